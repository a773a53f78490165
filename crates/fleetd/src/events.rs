// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast event schemas, one tagged enum per hub channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::repo::model::{DeviceId, DeviceStatus, EventType, StudentId};

/// Events on the device-status channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    DeviceStatusUpdate {
        device_id: DeviceId,
        status: DeviceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
}

/// Events on the device-info channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InfoEvent {
    DeviceInfoUpdate {
        device_id: DeviceId,
        info: DeviceInfoPayload,
        timestamp: DateTime<Utc>,
    },
}

/// Metadata snapshot fetched from a terminal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfoPayload {
    pub serial: Option<String>,
    pub name: Option<String>,
    pub firmware: Option<String>,
    pub device_time: Option<String>,
    pub capacity: Option<CapacityInfo>,
}

impl DeviceInfoPayload {
    /// True when the device reported nothing at all.
    pub fn is_empty(&self) -> bool {
        self.serial.is_none()
            && self.name.is_none()
            && self.firmware.is_none()
            && self.device_time.is_none()
            && self.capacity.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CapacityInfo {
    pub users: u32,
    pub fingers: u32,
    pub records: u32,
    pub cards: u32,
    pub faces: u32,
    pub users_cap: u32,
    pub fingers_cap: u32,
    pub rec_cap: u32,
    pub faces_cap: u32,
    pub users_av: u32,
    pub fingers_av: u32,
    pub rec_av: u32,
}

impl From<zkproto::codec::FreeSizes> for CapacityInfo {
    fn from(sizes: zkproto::codec::FreeSizes) -> Self {
        Self {
            users: sizes.users,
            fingers: sizes.fingers,
            records: sizes.records,
            cards: sizes.cards,
            faces: sizes.faces,
            users_cap: sizes.users_cap,
            fingers_cap: sizes.fingers_cap,
            rec_cap: sizes.rec_cap,
            faces_cap: sizes.faces_cap,
            users_av: sizes.users_av,
            fingers_av: sizes.fingers_av,
            rec_av: sizes.rec_av,
        }
    }
}

/// Events on the enrollment-progress channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrollmentEvent {
    EnrollmentProgress {
        session_id: Uuid,
        progress: u8,
        status: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    EnrollmentComplete {
        session_id: Uuid,
        progress: u8,
        status: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quality_score: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    EnrollmentError {
        session_id: Uuid,
        status: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    EnrollmentCancelled {
        session_id: Uuid,
        status: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Events on the attendance-scans channel: one message per ingestion round.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanFeedEvent {
    AttendanceEvents {
        events: Vec<LiveScan>,
        count: usize,
        timestamp: DateTime<Utc>,
    },
}

/// The live feed shows every tap, including duplicates that are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiveEventType {
    In,
    Out,
    Unknown,
    Duplicate,
}

impl From<EventType> for LiveEventType {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::In => Self::In,
            EventType::Out => Self::Out,
            EventType::Unknown => Self::Unknown,
        }
    }
}

/// One classified tap on the live feed. Duplicates carry a fresh UUID since
/// they have no database id.
#[derive(Debug, Clone, Serialize)]
pub struct LiveScan {
    pub id: Uuid,
    pub student_id: Option<StudentId>,
    pub student_name: Option<String>,
    pub admission_number: Option<String>,
    pub class_name: Option<String>,
    pub device_id: DeviceId,
    pub device_name: String,
    pub event_type: LiveEventType,
    pub occurred_at: DateTime<Utc>,
}

/// Control frames shared by every WebSocket endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    Connected { message: String, tenant_id: i64 },
    Pong,
}
