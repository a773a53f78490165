// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entity types shared by the stores, the pipeline and the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TenantId = i64;
pub type DeviceId = i64;
pub type StudentId = i64;
pub type EnrollmentId = i64;

/// Dedup key for one raw tap: `(device_user_id, occurred_at)`.
pub type ScanKey = (String, DateTime<Utc>);

// -- Devices ------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unknown,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ONLINE" => Self::Online,
            "OFFLINE" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Numeric comm password for the AUTH handshake, when the device has one.
    #[serde(skip_serializing)]
    pub comm_password: Option<u32>,
    pub serial: Option<String>,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub max_users: Option<i32>,
    pub enrolled_users: i32,
    pub group_id: Option<i64>,
}

// -- Enrollment ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnrollmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IN_PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentSession {
    pub id: EnrollmentId,
    pub session_uuid: Uuid,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub device_id: DeviceId,
    pub finger_index: u8,
    pub status: EnrollmentStatus,
    pub error_message: Option<String>,
    #[serde(skip_serializing)]
    pub sealed_template: Option<Vec<u8>>,
    pub quality_score: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub session_uuid: Uuid,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub device_id: DeviceId,
    pub finger_index: u8,
}

// -- Attendance ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    In,
    Out,
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IN" => Self::In,
            "OUT" => Self::Out,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub student_id: Option<StudentId>,
    pub device_user_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event_type: EventType,
    pub raw_payload: Option<serde_json::Value>,
}

// -- Students -----------------------------------------------------------------

/// Read-only decoration for the live attendance feed.
#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub id: StudentId,
    pub full_name: String,
    pub admission_number: String,
    pub class_name: Option<String>,
}

// -- Templates ----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FingerprintTemplate {
    pub id: i64,
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub device_id: DeviceId,
    pub finger_index: u8,
    pub sealed_bytes: Vec<u8>,
    pub quality: Option<i32>,
    pub enrollment_id: Option<EnrollmentId>,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub tenant_id: TenantId,
    pub student_id: StudentId,
    pub device_id: DeviceId,
    pub finger_index: u8,
    pub sealed_bytes: Vec<u8>,
    pub quality: Option<i32>,
    pub enrollment_id: Option<EnrollmentId>,
}
