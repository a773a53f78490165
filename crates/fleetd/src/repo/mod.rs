// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed, tenant-scoped persistence boundary.
//!
//! Every trait here treats soft-deleted rows as invisible. The Postgres
//! implementations live alongside; tests swap in in-memory fakes.

pub mod attendance;
pub mod devices;
pub mod enrollments;
pub mod model;
pub mod students;
pub mod templates;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::FleetError;
use model::{
    Device, DeviceId, DeviceStatus, EnrollmentId, EnrollmentSession, EventType,
    FingerprintTemplate, NewAttendanceRecord, NewEnrollment, NewTemplate, ScanKey, StudentId,
    StudentProfile, TenantId,
};

pub type RepoResult<T> = Result<T, FleetError>;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// All non-deleted devices, across tenants (the control loops span the fleet).
    async fn list_active(&self) -> RepoResult<Vec<Device>>;

    async fn get(&self, tenant: TenantId, id: DeviceId) -> RepoResult<Option<Device>>;

    /// `last_seen` is only advanced when provided; going offline keeps the
    /// last known-online timestamp.
    async fn update_status(
        &self,
        id: DeviceId,
        status: DeviceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> RepoResult<()>;

    async fn set_serial(&self, id: DeviceId, serial: &str) -> RepoResult<()>;

    async fn set_max_users(&self, id: DeviceId, max_users: i32) -> RepoResult<()>;
}

#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn create(&self, new: NewEnrollment) -> RepoResult<EnrollmentSession>;

    async fn get_by_uuid(
        &self,
        tenant: TenantId,
        session_uuid: Uuid,
    ) -> RepoResult<Option<EnrollmentSession>>;

    async fn mark_in_progress(&self, id: EnrollmentId) -> RepoResult<()>;

    async fn complete(
        &self,
        id: EnrollmentId,
        sealed_template: Option<&[u8]>,
        quality_score: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> RepoResult<()>;

    async fn fail(&self, id: EnrollmentId, error: &str) -> RepoResult<()>;

    async fn cancel(&self, id: EnrollmentId) -> RepoResult<()>;

    /// Whether an IN_PROGRESS session exists for `(device, finger)`.
    async fn active_for_finger(&self, device: DeviceId, finger_index: u8) -> RepoResult<bool>;

    /// Latest COMPLETED session per `(device, finger)` for one student.
    async fn latest_completed_by_student(
        &self,
        tenant: TenantId,
        student: StudentId,
    ) -> RepoResult<Vec<EnrollmentSession>>;

    /// Latest COMPLETED session per `(student, finger)` for one device.
    async fn latest_completed_by_device(
        &self,
        tenant: TenantId,
        device: DeviceId,
    ) -> RepoResult<Vec<EnrollmentSession>>;

    /// Finger indices with a COMPLETED enrollment on this device.
    async fn enrolled_finger_indices(
        &self,
        tenant: TenantId,
        student: StudentId,
        device: DeviceId,
    ) -> RepoResult<Vec<u8>>;
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Which of `keys` already exist for this `(tenant, device)`.
    async fn find_existing_keys(
        &self,
        tenant: TenantId,
        device: DeviceId,
        keys: &[ScanKey],
    ) -> RepoResult<HashSet<ScanKey>>;

    /// Insert all records in one transaction; returns the inserted count.
    async fn bulk_insert(&self, records: &[NewAttendanceRecord]) -> RepoResult<u64>;

    /// Last non-deleted record since `since` per student, one grouped query.
    async fn last_records_for_students(
        &self,
        tenant: TenantId,
        students: &[StudentId],
        since: DateTime<Utc>,
    ) -> RepoResult<HashMap<StudentId, (EventType, DateTime<Utc>)>>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    /// Which of `ids` exist (non-deleted) under this tenant.
    async fn find_existing(
        &self,
        tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashSet<StudentId>>;

    /// Display decoration for the live feed.
    async fn profiles(
        &self,
        tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashMap<StudentId, StudentProfile>>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn append(&self, template: NewTemplate) -> RepoResult<i64>;

    /// Soft-delete every template for `(student, finger)`.
    async fn revoke(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<()>;

    /// Canonical (latest non-deleted) template for `(student, finger)`.
    async fn latest_for(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<Option<FingerprintTemplate>>;
}
