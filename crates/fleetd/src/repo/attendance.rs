// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::model::{DeviceId, EventType, NewAttendanceRecord, ScanKey, StudentId, TenantId};
use super::{AttendanceStore, RepoResult};

pub struct PgAttendanceStore {
    pool: PgPool,
}

impl PgAttendanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
    async fn find_existing_keys(
        &self,
        tenant: TenantId,
        device: DeviceId,
        keys: &[ScanKey],
    ) -> RepoResult<HashSet<ScanKey>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        let user_ids: Vec<String> = keys.iter().map(|(uid, _)| uid.clone()).collect();
        let timestamps: Vec<DateTime<Utc>> = keys.iter().map(|(_, ts)| *ts).collect();

        let rows = sqlx::query(
            "SELECT device_user_id, occurred_at FROM attendance_records \
             WHERE tenant_id = $1 AND device_id = $2 AND NOT is_deleted \
               AND (device_user_id, occurred_at) IN \
                   (SELECT * FROM unnest($3::text[], $4::timestamptz[]))",
        )
        .bind(tenant)
        .bind(device)
        .bind(&user_ids)
        .bind(&timestamps)
        .fetch_all(&self.pool)
        .await?;

        let mut existing = HashSet::with_capacity(rows.len());
        for row in rows {
            existing.insert((row.try_get("device_user_id")?, row.try_get("occurred_at")?));
        }
        Ok(existing)
    }

    async fn bulk_insert(&self, records: &[NewAttendanceRecord]) -> RepoResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let tenants: Vec<TenantId> = records.iter().map(|r| r.tenant_id).collect();
        let devices: Vec<DeviceId> = records.iter().map(|r| r.device_id).collect();
        let students: Vec<Option<StudentId>> = records.iter().map(|r| r.student_id).collect();
        let user_ids: Vec<String> = records.iter().map(|r| r.device_user_id.clone()).collect();
        let occurred: Vec<DateTime<Utc>> = records.iter().map(|r| r.occurred_at).collect();
        let event_types: Vec<String> =
            records.iter().map(|r| r.event_type.as_str().to_owned()).collect();
        let payloads: Vec<Option<serde_json::Value>> =
            records.iter().map(|r| r.raw_payload.clone()).collect();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO attendance_records \
               (tenant_id, device_id, student_id, device_user_id, occurred_at, event_type, raw_payload) \
             SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::bigint[], $4::text[], \
                                  $5::timestamptz[], $6::text[], $7::jsonb[])",
        )
        .bind(&tenants)
        .bind(&devices)
        .bind(&students)
        .bind(&user_ids)
        .bind(&occurred)
        .bind(&event_types)
        .bind(&payloads)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn last_records_for_students(
        &self,
        tenant: TenantId,
        students: &[StudentId],
        since: DateTime<Utc>,
    ) -> RepoResult<HashMap<StudentId, (EventType, DateTime<Utc>)>> {
        if students.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT DISTINCT ON (student_id) student_id, event_type, occurred_at \
             FROM attendance_records \
             WHERE tenant_id = $1 AND student_id = ANY($2) \
               AND occurred_at >= $3 AND NOT is_deleted \
             ORDER BY student_id, occurred_at DESC",
        )
        .bind(tenant)
        .bind(students)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut last = HashMap::with_capacity(rows.len());
        for row in rows {
            let student: StudentId = row.try_get("student_id")?;
            let event_type: String = row.try_get("event_type")?;
            let occurred_at: DateTime<Utc> = row.try_get("occurred_at")?;
            last.insert(student, (EventType::parse(&event_type), occurred_at));
        }
        Ok(last)
    }
}
