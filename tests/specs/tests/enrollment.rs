// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enrollment happy-path broadcast sequence and terminal-state invariants.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use zkproto::enroll::{run_enrollment, EnrollOutcome, EnrollParams, EnrollProgress, EnrollTransport};
use zkproto::session::Event;

use fleetd::cache::ProcessedScanCache;
use fleetd::config::FleetConfig;
use fleetd::device::SessionPool;
use fleetd::enrollment::{self, progress_frame};
use fleetd::events::EnrollmentEvent;
use fleetd::hub::{BroadcastHub, Channel};
use fleetd::repo::model::{EnrollmentStatus, NewEnrollment};
use fleetd::repo::{EnrollmentStore, TemplateStore};
use fleetd::seal::PassthroughSealer;
use fleetd::state::{AppState, CancelRegistry};

use fleet_specs::{
    online_device, MemAttendanceStore, MemDeviceStore, MemEnrollmentStore, MemStudentDirectory,
    MemTemplateStore, RecordingSink, ScriptedLogs, TENANT,
};

fn test_config() -> FleetConfig {
    FleetConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        database_url: "postgres://unused".to_owned(),
        auth_token: None,
        health_interval_secs: 3600,
        info_sync_interval_secs: 3600,
        attendance_poll_interval_secs: 3600,
        attendance_poll_concurrency: 4,
        attendance_duplicate_window_minutes: 5,
        attendance_timezone: "Africa/Nairobi".to_owned(),
        default_device_timeout_secs: 5,
        enroll_timeout_secs: 60,
        enroll_max_attempts: 3,
        processed_keys_max_per_device: 5000,
        liveness_ttl_secs: 30,
        simulation_mode: true,
    }
}

fn test_state() -> Arc<AppState> {
    let config = test_config();
    let pool = Arc::new(SessionPool::new(&config));
    Arc::new(AppState {
        shutdown: CancellationToken::new(),
        hub: Arc::new(BroadcastHub::new()),
        pool,
        devices: MemDeviceStore::with(vec![online_device(3)]),
        enrollments: Arc::new(MemEnrollmentStore::default()),
        attendance: Arc::new(MemAttendanceStore::default()),
        students: MemStudentDirectory::with(vec![MemStudentDirectory::student(7, "Otieno Odhiambo")]),
        templates: Arc::new(MemTemplateStore::default()),
        sealer: Arc::new(PassthroughSealer),
        scan_cache: Arc::new(ProcessedScanCache::new(5000)),
        logs: Arc::new(ScriptedLogs::default()),
        enroll_cancels: CancelRegistry::default(),
        config,
    })
}

/// Scripted transport reproducing a clean three-press capture.
struct HappyDevice {
    frames: Vec<Event>,
    next: usize,
}

impl HappyDevice {
    fn new() -> Self {
        let progress = |code: u16| Event {
            flag: 8,
            code: Some(code),
            payload: code.to_le_bytes().to_vec(),
        };
        let mut summary_payload = 46u16.to_le_bytes().to_vec();
        summary_payload.extend_from_slice(&512u16.to_le_bytes());
        summary_payload.extend_from_slice(&1u16.to_le_bytes());
        let mut frames = vec![progress(1); 6];
        frames.push(Event {
            flag: 8,
            code: Some(46),
            payload: summary_payload,
        });
        Self { frames, next: 0 }
    }
}

impl EnrollTransport for HappyDevice {
    fn start_enrollment(&mut self, _user_id: &str, _finger_index: u8) -> zkproto::Result<()> {
        Ok(())
    }

    fn register_events(&mut self, _mask: u32) -> zkproto::Result<()> {
        Ok(())
    }

    fn cancel_capture(&mut self) {}

    fn recv_event(&mut self, _timeout: Duration) -> zkproto::Result<Event> {
        let frame = self.frames.get(self.next).cloned();
        self.next += 1;
        frame.ok_or(zkproto::ZkError::EventTimeout)
    }

    fn get_template_bytes(
        &mut self,
        _user_id: &str,
        _finger_index: u8,
    ) -> zkproto::Result<Option<Vec<u8>>> {
        Ok(Some(b"sealed-me".to_vec()))
    }
}

async fn in_progress_session(state: &Arc<AppState>) -> fleetd::repo::model::EnrollmentSession {
    let session = state
        .enrollments
        .create(NewEnrollment {
            session_uuid: Uuid::new_v4(),
            tenant_id: TENANT,
            student_id: 7,
            device_id: 3,
            finger_index: 1,
        })
        .await
        .unwrap();
    state.enrollments.mark_in_progress(session.id).await.unwrap();
    session
}

/// Drive the scripted capture and forward progress the way the daemon's
/// enrollment task does, then finalize from the outcome.
async fn drive_to_completion(state: &Arc<AppState>, session_uuid: Uuid) -> EnrollOutcome {
    let mut device = HappyDevice::new();
    let params = EnrollParams {
        user_id: "7".to_owned(),
        finger_index: 1,
        timeout: Duration::from_secs(60),
        max_attempts: 3,
    };
    let cancel = AtomicBool::new(false);
    let mut seen: Vec<EnrollProgress> = Vec::new();
    let outcome = run_enrollment(&mut device, &params, &cancel, &mut |p| seen.push(p));

    for progress in &seen {
        let (pct, status, message) = progress_frame(progress);
        state
            .hub
            .publish(
                Channel::Enrollment,
                TENANT,
                &EnrollmentEvent::EnrollmentProgress {
                    session_id: session_uuid,
                    progress: pct,
                    status: status.to_owned(),
                    message,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    enrollment::finalize(state, TENANT, session_uuid, outcome.clone()).await;
    outcome
}

#[tokio::test]
async fn happy_path_broadcast_sequence_and_row() {
    let state = test_state();
    let sink = Arc::new(RecordingSink::default());
    state.hub.subscribe(Channel::Enrollment, TENANT, sink.clone()).await;

    let session = in_progress_session(&state).await;
    let outcome = drive_to_completion(&state, session.session_uuid).await;
    assert!(matches!(outcome, EnrollOutcome::Completed { .. }));

    let messages = sink.received();
    let frames: Vec<(String, i64, String)> = messages
        .iter()
        .map(|m| {
            (
                m["type"].as_str().unwrap_or_default().to_owned(),
                m["progress"].as_i64().unwrap_or(-1),
                m["status"].as_str().unwrap_or_default().to_owned(),
            )
        })
        .collect();

    let progress = |p: i64, s: &str| ("enrollment_progress".to_owned(), p, s.to_owned());
    assert_eq!(
        frames,
        vec![
            progress(0, "ready"),
            progress(33, "placing"),
            progress(66, "processing"),
            progress(33, "placing"),
            progress(66, "processing"),
            progress(33, "placing"),
            progress(66, "processing"),
            ("enrollment_complete".to_owned(), 100, "complete".to_owned()),
        ]
    );
    assert_eq!(messages[7]["quality_score"], 512);

    let row = state
        .enrollments
        .get_by_uuid(TENANT, session.session_uuid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, EnrollmentStatus::Completed);
    assert_eq!(row.sealed_template, Some(b"sealed-me".to_vec()));
    assert_eq!(row.quality_score, Some(512));
    assert!(row.completed_at.is_some());

    // The canonical template copy landed in the template store.
    let stored = state.templates.latest_for(TENANT, 7, 1).await.unwrap().unwrap();
    assert_eq!(stored.sealed_bytes, b"sealed-me".to_vec());
    assert_eq!(stored.enrollment_id, Some(row.id));
}

#[tokio::test]
async fn cancel_then_late_completion_changes_nothing() {
    let state = test_state();
    let sink = Arc::new(RecordingSink::default());
    state.hub.subscribe(Channel::Enrollment, TENANT, sink.clone()).await;

    let session = in_progress_session(&state).await;
    state.enroll_cancels.register(session.session_uuid);

    let cancelled = enrollment::cancel_enrollment(&state, TENANT, session.session_uuid)
        .await
        .unwrap();
    assert_eq!(cancelled.status, EnrollmentStatus::Cancelled);
    assert_eq!(sink.received().len(), 1);
    assert_eq!(sink.received()[0]["type"], "enrollment_cancelled");

    // The driver finishing afterwards must not revive the session or
    // broadcast a second terminal event.
    enrollment::finalize(
        &state,
        TENANT,
        session.session_uuid,
        EnrollOutcome::Completed {
            template: b"late".to_vec(),
            size: 100,
            position: 0,
        },
    )
    .await;

    let row = state
        .enrollments
        .get_by_uuid(TENANT, session.session_uuid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, EnrollmentStatus::Cancelled);
    assert_eq!(row.sealed_template, None);
    assert_eq!(sink.received().len(), 1);
}

#[tokio::test]
async fn cancel_requires_an_in_progress_session() {
    let state = test_state();
    let session = in_progress_session(&state).await;
    state.enroll_cancels.register(session.session_uuid);

    enrollment::cancel_enrollment(&state, TENANT, session.session_uuid).await.unwrap();
    let err = enrollment::cancel_enrollment(&state, TENANT, session.session_uuid)
        .await
        .unwrap_err();
    assert!(matches!(err, fleetd::error::FleetError::EnrollmentNotActive(_)));
}

#[tokio::test]
async fn failed_capture_broadcasts_one_error() {
    let state = test_state();
    let sink = Arc::new(RecordingSink::default());
    state.hub.subscribe(Channel::Enrollment, TENANT, sink.clone()).await;

    let session = in_progress_session(&state).await;
    enrollment::finalize(&state, TENANT, session.session_uuid, EnrollOutcome::Duplicate).await;

    let messages = sink.received();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "enrollment_error");
    assert_eq!(messages[0]["error"], "This fingerprint is already enrolled");

    let row = state
        .enrollments
        .get_by_uuid(TENANT, session.session_uuid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, EnrollmentStatus::Failed);
}
