// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::model::{FingerprintTemplate, NewTemplate, StudentId, TenantId};
use super::{RepoResult, TemplateStore};

/// Append-only store; revocation is a soft delete so the canonical copy for
/// re-sync is always the latest non-deleted row per `(student, finger)`.
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn append(&self, template: NewTemplate) -> RepoResult<i64> {
        let row = sqlx::query(
            "INSERT INTO fingerprint_templates \
               (tenant_id, student_id, device_id, finger_index, sealed_bytes, quality, enrollment_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id",
        )
        .bind(template.tenant_id)
        .bind(template.student_id)
        .bind(template.device_id)
        .bind(i16::from(template.finger_index))
        .bind(&template.sealed_bytes)
        .bind(template.quality)
        .bind(template.enrollment_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn revoke(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE fingerprint_templates SET is_deleted = TRUE \
             WHERE tenant_id = $1 AND student_id = $2 AND finger_index = $3 AND NOT is_deleted",
        )
        .bind(tenant)
        .bind(student)
        .bind(i16::from(finger_index))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_for(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<Option<FingerprintTemplate>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, student_id, device_id, finger_index, sealed_bytes, quality, \
                    enrollment_id \
             FROM fingerprint_templates \
             WHERE tenant_id = $1 AND student_id = $2 AND finger_index = $3 AND NOT is_deleted \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(tenant)
        .bind(student)
        .bind(i16::from(finger_index))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let finger: i16 = row.try_get("finger_index")?;
            Ok::<_, sqlx::Error>(FingerprintTemplate {
                id: row.try_get("id")?,
                tenant_id: row.try_get("tenant_id")?,
                student_id: row.try_get("student_id")?,
                device_id: row.try_get("device_id")?,
                finger_index: finger as u8,
                sealed_bytes: row.try_get("sealed_bytes")?,
                quality: row.try_get("quality")?,
                enrollment_id: row.try_get("enrollment_id")?,
            })
        })
        .transpose()
        .map_err(Into::into)
    }
}
