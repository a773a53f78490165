// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::model::{StudentId, StudentProfile, TenantId};
use super::{RepoResult, StudentDirectory};

pub struct PgStudentDirectory {
    pool: PgPool,
}

impl PgStudentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StudentDirectory for PgStudentDirectory {
    async fn find_existing(
        &self,
        tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashSet<StudentId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            "SELECT id FROM students \
             WHERE tenant_id = $1 AND id = ANY($2) AND NOT is_deleted",
        )
        .bind(tenant)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<StudentId, _>("id").map_err(Into::into))
            .collect()
    }

    async fn profiles(
        &self,
        tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashMap<StudentId, StudentProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT s.id, s.first_name, s.last_name, s.admission_number, c.name AS class_name \
             FROM students s \
             LEFT JOIN classes c ON c.id = s.class_id AND NOT c.is_deleted \
             WHERE s.tenant_id = $1 AND s.id = ANY($2) AND NOT s.is_deleted",
        )
        .bind(tenant)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut profiles = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: StudentId = row.try_get("id")?;
            let first: String = row.try_get("first_name")?;
            let last: String = row.try_get("last_name")?;
            profiles.insert(
                id,
                StudentProfile {
                    id,
                    full_name: format!("{first} {last}"),
                    admission_number: row.try_get("admission_number")?,
                    class_name: row.try_get("class_name")?,
                },
            );
        }
        Ok(profiles)
    }
}
