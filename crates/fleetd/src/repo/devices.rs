// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::model::{Device, DeviceId, DeviceStatus, TenantId};
use super::{DeviceStore, RepoResult};

pub struct PgDeviceStore {
    pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DEVICE_COLUMNS: &str = "id, tenant_id, name, host, port, comm_password, serial, status, \
     last_seen, max_users, enrolled_users, group_id";

fn device_from_row(row: &PgRow) -> Result<Device, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let port: i32 = row.try_get("port")?;
    let comm_password: Option<i64> = row.try_get("comm_password")?;
    Ok(Device {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: port as u16,
        comm_password: comm_password.map(|p| p as u32),
        serial: row.try_get("serial")?,
        status: DeviceStatus::parse(&status),
        last_seen: row.try_get("last_seen")?,
        max_users: row.try_get("max_users")?,
        enrolled_users: row.try_get("enrolled_users")?,
        group_id: row.try_get("group_id")?,
    })
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn list_active(&self) -> RepoResult<Vec<Device>> {
        let rows = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE NOT is_deleted ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| device_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn get(&self, tenant: TenantId, id: DeviceId) -> RepoResult<Option<Device>> {
        let row = sqlx::query(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices \
             WHERE id = $1 AND tenant_id = $2 AND NOT is_deleted"
        ))
        .bind(id)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(device_from_row)
            .transpose()
            .map_err(Into::into)
    }

    async fn update_status(
        &self,
        id: DeviceId,
        status: DeviceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE devices SET status = $2, last_seen = COALESCE($3, last_seen) \
             WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_serial(&self, id: DeviceId, serial: &str) -> RepoResult<()> {
        sqlx::query("UPDATE devices SET serial = $2 WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .bind(serial)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_max_users(&self, id: DeviceId, max_users: i32) -> RepoResult<()> {
        sqlx::query("UPDATE devices SET max_users = $2 WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .bind(max_users)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
