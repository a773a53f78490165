// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end pipeline and enrollment scenarios.
//!
//! Provides in-memory implementations of the persistence traits, a scripted
//! log source standing in for real terminals, and a recording event sink
//! for asserting broadcasts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use fleetd::cache::ProcessedScanCache;
use fleetd::error::FleetError;
use fleetd::hub::{BroadcastHub, EventSink};
use fleetd::pipeline::{IngestionPipeline, LogSource};
use fleetd::repo::model::{
    Device, DeviceId, DeviceStatus, EnrollmentId, EnrollmentSession, EnrollmentStatus, EventType,
    FingerprintTemplate, NewAttendanceRecord, NewEnrollment, NewTemplate, ScanKey, StudentId,
    StudentProfile, TenantId,
};
use fleetd::repo::{
    AttendanceStore, DeviceStore, EnrollmentStore, RepoResult, StudentDirectory, TemplateStore,
};

pub const TENANT: TenantId = 1;
pub const NAIROBI: chrono_tz::Tz = chrono_tz::Tz::Africa__Nairobi;

/// Device-local naive timestamp on the canonical test day.
pub fn local(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 8, 1)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .unwrap()
}

/// The UTC instant a device-local timestamp maps to (Nairobi is UTC+3).
pub fn local_utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    NAIROBI
        .from_local_datetime(&local(h, m, s))
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

pub fn raw_log(user_id: &str, timestamp: NaiveDateTime) -> zkproto::AttendanceLog {
    zkproto::AttendanceLog {
        user_id: user_id.to_owned(),
        timestamp,
        punch: 1,
    }
}

pub fn online_device(id: DeviceId) -> Device {
    Device {
        id,
        tenant_id: TENANT,
        name: format!("Gate {id}"),
        host: format!("10.0.0.{id}"),
        port: 4370,
        comm_password: None,
        serial: Some(format!("SN{id:04}")),
        status: DeviceStatus::Online,
        last_seen: None,
        max_users: None,
        enrolled_users: 0,
        group_id: None,
    }
}

// -- In-memory stores ---------------------------------------------------------

#[derive(Default)]
pub struct MemDeviceStore {
    pub devices: Mutex<Vec<Device>>,
}

impl MemDeviceStore {
    pub fn with(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
        })
    }
}

#[async_trait]
impl DeviceStore for MemDeviceStore {
    async fn list_active(&self) -> RepoResult<Vec<Device>> {
        Ok(self.devices.lock().clone())
    }

    async fn get(&self, tenant: TenantId, id: DeviceId) -> RepoResult<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .find(|d| d.id == id && d.tenant_id == tenant)
            .cloned())
    }

    async fn update_status(
        &self,
        id: DeviceId,
        status: DeviceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        for device in self.devices.lock().iter_mut() {
            if device.id == id {
                device.status = status;
                if last_seen.is_some() {
                    device.last_seen = last_seen;
                }
            }
        }
        Ok(())
    }

    async fn set_serial(&self, id: DeviceId, serial: &str) -> RepoResult<()> {
        for device in self.devices.lock().iter_mut() {
            if device.id == id {
                device.serial = Some(serial.to_owned());
            }
        }
        Ok(())
    }

    async fn set_max_users(&self, id: DeviceId, max_users: i32) -> RepoResult<()> {
        for device in self.devices.lock().iter_mut() {
            if device.id == id {
                device.max_users = Some(max_users);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemAttendanceStore {
    pub records: Mutex<Vec<NewAttendanceRecord>>,
}

#[async_trait]
impl AttendanceStore for MemAttendanceStore {
    async fn find_existing_keys(
        &self,
        tenant: TenantId,
        device: DeviceId,
        keys: &[ScanKey],
    ) -> RepoResult<HashSet<ScanKey>> {
        let wanted: HashSet<&ScanKey> = keys.iter().collect();
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.tenant_id == tenant && r.device_id == device)
            .map(|r| (r.device_user_id.clone(), r.occurred_at))
            .filter(|k| wanted.contains(k))
            .collect())
    }

    async fn bulk_insert(&self, records: &[NewAttendanceRecord]) -> RepoResult<u64> {
        self.records.lock().extend(records.iter().cloned());
        Ok(records.len() as u64)
    }

    async fn last_records_for_students(
        &self,
        tenant: TenantId,
        students: &[StudentId],
        since: DateTime<Utc>,
    ) -> RepoResult<HashMap<StudentId, (EventType, DateTime<Utc>)>> {
        let wanted: HashSet<StudentId> = students.iter().copied().collect();
        let mut last: HashMap<StudentId, (EventType, DateTime<Utc>)> = HashMap::new();
        for record in self.records.lock().iter() {
            let Some(student) = record.student_id else {
                continue;
            };
            if record.tenant_id != tenant || !wanted.contains(&student) || record.occurred_at < since
            {
                continue;
            }
            match last.get(&student) {
                Some((_, at)) if *at >= record.occurred_at => {}
                _ => {
                    last.insert(student, (record.event_type, record.occurred_at));
                }
            }
        }
        Ok(last)
    }
}

pub struct MemStudentDirectory {
    pub profiles: Mutex<HashMap<StudentId, StudentProfile>>,
}

impl MemStudentDirectory {
    pub fn with(students: Vec<StudentProfile>) -> Arc<Self> {
        Arc::new(Self {
            profiles: Mutex::new(students.into_iter().map(|p| (p.id, p)).collect()),
        })
    }

    pub fn student(id: StudentId, name: &str) -> StudentProfile {
        StudentProfile {
            id,
            full_name: name.to_owned(),
            admission_number: format!("ADM-{id}"),
            class_name: Some("Grade 6".to_owned()),
        }
    }
}

#[async_trait]
impl StudentDirectory for MemStudentDirectory {
    async fn find_existing(
        &self,
        _tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashSet<StudentId>> {
        let known = self.profiles.lock();
        Ok(ids.iter().copied().filter(|id| known.contains_key(id)).collect())
    }

    async fn profiles(
        &self,
        _tenant: TenantId,
        ids: &[StudentId],
    ) -> RepoResult<HashMap<StudentId, StudentProfile>> {
        let known = self.profiles.lock();
        Ok(ids
            .iter()
            .filter_map(|id| known.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[derive(Default)]
pub struct MemEnrollmentStore {
    pub sessions: Mutex<Vec<EnrollmentSession>>,
    next_id: Mutex<EnrollmentId>,
}

#[async_trait]
impl EnrollmentStore for MemEnrollmentStore {
    async fn create(&self, new: NewEnrollment) -> RepoResult<EnrollmentSession> {
        let mut next = self.next_id.lock();
        *next += 1;
        let session = EnrollmentSession {
            id: *next,
            session_uuid: new.session_uuid,
            tenant_id: new.tenant_id,
            student_id: new.student_id,
            device_id: new.device_id,
            finger_index: new.finger_index,
            status: EnrollmentStatus::Pending,
            error_message: None,
            sealed_template: None,
            quality_score: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    async fn get_by_uuid(
        &self,
        tenant: TenantId,
        session_uuid: Uuid,
    ) -> RepoResult<Option<EnrollmentSession>> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .find(|s| s.session_uuid == session_uuid && s.tenant_id == tenant)
            .cloned())
    }

    async fn mark_in_progress(&self, id: EnrollmentId) -> RepoResult<()> {
        self.update(id, |s| {
            if s.status == EnrollmentStatus::Pending {
                s.status = EnrollmentStatus::InProgress;
            }
        });
        Ok(())
    }

    async fn complete(
        &self,
        id: EnrollmentId,
        sealed_template: Option<&[u8]>,
        quality_score: Option<i32>,
        completed_at: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.update(id, |s| {
            if s.status == EnrollmentStatus::InProgress {
                s.status = EnrollmentStatus::Completed;
                s.sealed_template = sealed_template.map(<[u8]>::to_vec);
                s.quality_score = quality_score;
                s.completed_at = Some(completed_at);
                s.error_message = None;
            }
        });
        Ok(())
    }

    async fn fail(&self, id: EnrollmentId, error: &str) -> RepoResult<()> {
        self.update(id, |s| {
            if !s.status.is_terminal() {
                s.status = EnrollmentStatus::Failed;
                s.error_message = Some(error.to_owned());
                s.completed_at = Some(Utc::now());
            }
        });
        Ok(())
    }

    async fn cancel(&self, id: EnrollmentId) -> RepoResult<()> {
        self.update(id, |s| {
            if !s.status.is_terminal() {
                s.status = EnrollmentStatus::Cancelled;
                s.completed_at = Some(Utc::now());
            }
        });
        Ok(())
    }

    async fn active_for_finger(&self, device: DeviceId, finger_index: u8) -> RepoResult<bool> {
        Ok(self.sessions.lock().iter().any(|s| {
            s.device_id == device
                && s.finger_index == finger_index
                && s.status == EnrollmentStatus::InProgress
        }))
    }

    async fn latest_completed_by_student(
        &self,
        tenant: TenantId,
        student: StudentId,
    ) -> RepoResult<Vec<EnrollmentSession>> {
        Ok(self
            .completed(|s| s.tenant_id == tenant && s.student_id == student)
            .into_values()
            .collect())
    }

    async fn latest_completed_by_device(
        &self,
        tenant: TenantId,
        device: DeviceId,
    ) -> RepoResult<Vec<EnrollmentSession>> {
        Ok(self
            .completed(|s| s.tenant_id == tenant && s.device_id == device)
            .into_values()
            .collect())
    }

    async fn enrolled_finger_indices(
        &self,
        tenant: TenantId,
        student: StudentId,
        device: DeviceId,
    ) -> RepoResult<Vec<u8>> {
        let mut fingers: Vec<u8> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| {
                s.tenant_id == tenant
                    && s.student_id == student
                    && s.device_id == device
                    && s.status == EnrollmentStatus::Completed
            })
            .map(|s| s.finger_index)
            .collect();
        fingers.sort_unstable();
        fingers.dedup();
        Ok(fingers)
    }
}

impl MemEnrollmentStore {
    fn update(&self, id: EnrollmentId, apply: impl FnOnce(&mut EnrollmentSession)) {
        if let Some(session) = self.sessions.lock().iter_mut().find(|s| s.id == id) {
            apply(session);
        }
    }

    fn completed(
        &self,
        keep: impl Fn(&EnrollmentSession) -> bool,
    ) -> HashMap<(DeviceId, StudentId, u8), EnrollmentSession> {
        let mut latest: HashMap<(DeviceId, StudentId, u8), EnrollmentSession> = HashMap::new();
        for session in self.sessions.lock().iter() {
            if session.status != EnrollmentStatus::Completed || !keep(session) {
                continue;
            }
            let key = (session.device_id, session.student_id, session.finger_index);
            match latest.get(&key) {
                Some(existing) if existing.id >= session.id => {}
                _ => {
                    latest.insert(key, session.clone());
                }
            }
        }
        latest
    }
}

#[derive(Default)]
pub struct MemTemplateStore {
    pub templates: Mutex<Vec<FingerprintTemplate>>,
}

#[async_trait]
impl TemplateStore for MemTemplateStore {
    async fn append(&self, template: NewTemplate) -> RepoResult<i64> {
        let mut templates = self.templates.lock();
        let id = templates.len() as i64 + 1;
        templates.push(FingerprintTemplate {
            id,
            tenant_id: template.tenant_id,
            student_id: template.student_id,
            device_id: template.device_id,
            finger_index: template.finger_index,
            sealed_bytes: template.sealed_bytes,
            quality: template.quality,
            enrollment_id: template.enrollment_id,
        });
        Ok(id)
    }

    async fn revoke(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<()> {
        self.templates.lock().retain(|t| {
            !(t.tenant_id == tenant && t.student_id == student && t.finger_index == finger_index)
        });
        Ok(())
    }

    async fn latest_for(
        &self,
        tenant: TenantId,
        student: StudentId,
        finger_index: u8,
    ) -> RepoResult<Option<FingerprintTemplate>> {
        Ok(self
            .templates
            .lock()
            .iter()
            .filter(|t| {
                t.tenant_id == tenant && t.student_id == student && t.finger_index == finger_index
            })
            .max_by_key(|t| t.id)
            .cloned())
    }
}

// -- Scripted device log source -----------------------------------------------

/// Hands out one scripted batch per poll; an exhausted script reads as a
/// device with no logs.
#[derive(Default)]
pub struct ScriptedLogs {
    batches: Mutex<VecDeque<Vec<zkproto::AttendanceLog>>>,
}

impl ScriptedLogs {
    pub fn push(&self, batch: Vec<zkproto::AttendanceLog>) {
        self.batches.lock().push_back(batch);
    }
}

#[async_trait]
impl LogSource for ScriptedLogs {
    async fn fetch_attendance_logs(
        &self,
        _device: &Device,
    ) -> Result<Vec<zkproto::AttendanceLog>, FleetError> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }
}

// -- Recording event sink -----------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<serde_json::Value>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.messages.lock().push(serde_json::from_str(text)?);
        Ok(())
    }
}

// -- World --------------------------------------------------------------------

/// Everything an ingestion scenario needs, wired over the in-memory fakes.
pub struct World {
    pub devices: Arc<MemDeviceStore>,
    pub attendance: Arc<MemAttendanceStore>,
    pub students: Arc<MemStudentDirectory>,
    pub logs: Arc<ScriptedLogs>,
    pub hub: Arc<BroadcastHub>,
    pub cache: Arc<ProcessedScanCache>,
}

impl World {
    pub fn new(devices: Vec<Device>, students: Vec<StudentProfile>) -> Self {
        Self {
            devices: MemDeviceStore::with(devices),
            attendance: Arc::new(MemAttendanceStore::default()),
            students: MemStudentDirectory::with(students),
            logs: Arc::new(ScriptedLogs::default()),
            hub: Arc::new(BroadcastHub::new()),
            cache: Arc::new(ProcessedScanCache::new(5000)),
        }
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.devices.clone(),
            self.attendance.clone(),
            self.students.clone(),
            self.logs.clone(),
            self.hub.clone(),
            self.cache.clone(),
            NAIROBI,
            chrono::Duration::minutes(5),
        )
    }
}
