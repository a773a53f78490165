// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::model::{
    DeviceId, EnrollmentId, EnrollmentSession, EnrollmentStatus, NewEnrollment, StudentId,
    TenantId,
};
use super::{EnrollmentStore, RepoResult};

pub struct PgEnrollmentStore {
    pool: PgPool,
}

impl PgEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENROLLMENT_COLUMNS: &str = "id, session_uuid, tenant_id, student_id, device_id, \
     finger_index, status, error_message, sealed_template, quality_score, started_at, \
     completed_at";

fn enrollment_from_row(row: &PgRow) -> Result<EnrollmentSession, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let finger: i16 = row.try_get("finger_index")?;
    Ok(EnrollmentSession {
        id: row.try_get("id")?,
        session_uuid: row.try_get("session_uuid")?,
        tenant_id: row.try_get("tenant_id")?,
        student_id: row.try_get("student_id")?,
        device_id: row.try_get("device_id")?,
        finger_index: finger as u8,
        status: EnrollmentStatus::parse(&status),
        error_message: row.try_get("error_message")?,
        sealed_template: row.try_get("sealed_template")?,
        quality_score: row.try_get("quality_score")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn create(&self, new: NewEnrollment) -> RepoResult<EnrollmentSession> {
        let row = sqlx::query(&format!(
            "INSERT INTO enrollment_sessions \
               (session_uuid, tenant_id, student_id, device_id, finger_index, status, started_at) \
             VALUES ($1, $2, $3, $4, $5, 'PENDING', now()) \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(new.session_uuid)
        .bind(new.tenant_id)
        .bind(new.student_id)
        .bind(new.device_id)
        .bind(i16::from(new.finger_index))
        .fetch_one(&self.pool)
        .await?;
        enrollment_from_row(&row).map_err(Into::into)
    }

    async fn get_by_uuid(
        &self,
        tenant: TenantId,
        session_uuid: Uuid,
    ) -> RepoResult<Option<EnrollmentSession>> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollment_sessions \
             WHERE session_uuid = $1 AND tenant_id = $2 AND NOT is_deleted"
        ))
        .bind(session_uuid)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(enrollment_from_row)
            .transpose()
            .map_err(Into::into)
    }

    async fn mark_in_progress(&self, id: EnrollmentId) -> RepoResult<()> {
        sqlx::query(
            "UPDATE enrollment_sessions SET status = 'IN_PROGRESS' \
             WHERE id = $1 AND status = 'PENDING' AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(
        &self,
        id: EnrollmentId,
        sealed_template: Option<&[u8]>,
        quality_score: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        sqlx::query(
            "UPDATE enrollment_sessions \
             SET status = 'COMPLETED', sealed_template = $2, quality_score = $3, \
                 completed_at = $4, error_message = NULL \
             WHERE id = $1 AND status = 'IN_PROGRESS' AND NOT is_deleted",
        )
        .bind(id)
        .bind(sealed_template)
        .bind(quality_score)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: EnrollmentId, error: &str) -> RepoResult<()> {
        sqlx::query(
            "UPDATE enrollment_sessions \
             SET status = 'FAILED', error_message = $2, completed_at = now() \
             WHERE id = $1 AND status IN ('PENDING', 'IN_PROGRESS') AND NOT is_deleted",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, id: EnrollmentId) -> RepoResult<()> {
        sqlx::query(
            "UPDATE enrollment_sessions \
             SET status = 'CANCELLED', completed_at = now() \
             WHERE id = $1 AND status IN ('PENDING', 'IN_PROGRESS') AND NOT is_deleted",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_for_finger(&self, device: DeviceId, finger_index: u8) -> RepoResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS( \
               SELECT 1 FROM enrollment_sessions \
               WHERE device_id = $1 AND finger_index = $2 \
                 AND status = 'IN_PROGRESS' AND NOT is_deleted) AS active",
        )
        .bind(device)
        .bind(i16::from(finger_index))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("active")?)
    }

    async fn latest_completed_by_student(
        &self,
        tenant: TenantId,
        student: StudentId,
    ) -> RepoResult<Vec<EnrollmentSession>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT ON (device_id, finger_index) {ENROLLMENT_COLUMNS} \
             FROM enrollment_sessions \
             WHERE tenant_id = $1 AND student_id = $2 \
               AND status = 'COMPLETED' AND NOT is_deleted \
             ORDER BY device_id, finger_index, id DESC"
        ))
        .bind(tenant)
        .bind(student)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| enrollment_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn latest_completed_by_device(
        &self,
        tenant: TenantId,
        device: DeviceId,
    ) -> RepoResult<Vec<EnrollmentSession>> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT ON (student_id, finger_index) {ENROLLMENT_COLUMNS} \
             FROM enrollment_sessions \
             WHERE tenant_id = $1 AND device_id = $2 \
               AND status = 'COMPLETED' AND NOT is_deleted \
             ORDER BY student_id, finger_index, id DESC"
        ))
        .bind(tenant)
        .bind(device)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| enrollment_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn enrolled_finger_indices(
        &self,
        tenant: TenantId,
        student: StudentId,
        device: DeviceId,
    ) -> RepoResult<Vec<u8>> {
        let rows = sqlx::query(
            "SELECT DISTINCT finger_index FROM enrollment_sessions \
             WHERE tenant_id = $1 AND student_id = $2 AND device_id = $3 \
               AND status = 'COMPLETED' AND NOT is_deleted \
             ORDER BY finger_index",
        )
        .bind(tenant)
        .bind(student)
        .bind(device)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<i16, _>("finger_index")
                    .map(|f| f as u8)
                    .map_err(Into::into)
            })
            .collect()
    }
}
