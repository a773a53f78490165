// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::enroll::{
    code4_is_timeout, run_enrollment, EnrollOutcome, EnrollParams, EnrollProgress,
    EnrollTransport, RES_CANCELLED, RES_DUPLICATE, RES_LOW_QUALITY, RES_OK, RES_TIMEOUT,
};
use crate::error::{Result, ZkError};
use crate::session::Event;

/// Scripted transport: hands out a canned event sequence and records the
/// cleanup calls the driver makes.
struct Scripted {
    events: VecDeque<Result<Event>>,
    template: Option<Vec<u8>>,
    reg_calls: Vec<u32>,
    cancel_calls: usize,
    started: bool,
}

impl Scripted {
    fn new(events: Vec<Result<Event>>, template: Option<Vec<u8>>) -> Self {
        Self {
            events: events.into(),
            template,
            reg_calls: Vec::new(),
            cancel_calls: 0,
            started: false,
        }
    }
}

impl EnrollTransport for Scripted {
    fn start_enrollment(&mut self, _user_id: &str, _finger_index: u8) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn register_events(&mut self, mask: u32) -> Result<()> {
        self.reg_calls.push(mask);
        Ok(())
    }

    fn cancel_capture(&mut self) {
        self.cancel_calls += 1;
    }

    fn recv_event(&mut self, _timeout: Duration) -> Result<Event> {
        self.events
            .pop_front()
            .unwrap_or(Err(ZkError::EventTimeout))
    }

    fn get_template_bytes(&mut self, _user_id: &str, _finger_index: u8) -> Result<Option<Vec<u8>>> {
        Ok(self.template.clone())
    }
}

fn event(code: u16) -> Result<Event> {
    Ok(Event {
        flag: 8,
        code: Some(code),
        payload: code.to_le_bytes().to_vec(),
    })
}

fn summary_event(code: u16, size: u16, position: u16) -> Result<Event> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&code.to_le_bytes());
    payload.extend_from_slice(&size.to_le_bytes());
    payload.extend_from_slice(&position.to_le_bytes());
    Ok(Event {
        flag: 8,
        code: Some(code),
        payload,
    })
}

fn params() -> EnrollParams {
    EnrollParams {
        user_id: "7".to_string(),
        finger_index: 1,
        timeout: Duration::from_secs(60),
        max_attempts: 3,
    }
}

/// A generic non-terminal frame code, as firmware emits for plain progress.
const PROGRESS: u16 = 1;

fn run(transport: &mut Scripted) -> (EnrollOutcome, Vec<EnrollProgress>) {
    let cancel = AtomicBool::new(false);
    let mut seen = Vec::new();
    let outcome = run_enrollment(transport, &params(), &cancel, &mut |p| seen.push(p));
    (outcome, seen)
}

#[test]
fn happy_path_three_presses() {
    let mut transport = Scripted::new(
        vec![
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            summary_event(46, 512, 1),
        ],
        Some(b"template-bytes".to_vec()),
    );
    let (outcome, seen) = run(&mut transport);

    assert_eq!(
        outcome,
        EnrollOutcome::Completed {
            template: b"template-bytes".to_vec(),
            size: 512,
            position: 1,
        }
    );
    assert_eq!(
        seen,
        vec![
            EnrollProgress::Started,
            EnrollProgress::FingerDetected { attempt: 1 },
            EnrollProgress::FingerProcessed { attempt: 1 },
            EnrollProgress::FingerDetected { attempt: 2 },
            EnrollProgress::FingerProcessed { attempt: 2 },
            EnrollProgress::FingerDetected { attempt: 3 },
            EnrollProgress::FingerProcessed { attempt: 3 },
        ]
    );
    // Cleanup always runs: EF_ENROLLFINGER on, then mask 0 off.
    assert_eq!(transport.reg_calls, vec![8, 0]);
    assert!(transport.cancel_calls >= 1);
    assert!(transport.started);
}

#[test]
fn success_code_zero_on_summary_frame() {
    let mut transport = Scripted::new(
        vec![
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            summary_event(RES_OK, 700, 2),
        ],
        Some(vec![1, 2, 3]),
    );
    let (outcome, _) = run(&mut transport);
    assert!(matches!(
        outcome,
        EnrollOutcome::Completed { size: 700, position: 2, .. }
    ));
}

#[test]
fn early_success_on_first_wait() {
    let mut transport = Scripted::new(
        vec![summary_event(RES_OK, 640, 3)],
        Some(vec![9]),
    );
    let (outcome, seen) = run(&mut transport);
    assert!(matches!(outcome, EnrollOutcome::Completed { size: 640, .. }));
    assert_eq!(seen, vec![EnrollProgress::Started]);
}

#[test]
fn duplicate_finger_on_summary() {
    let mut transport = Scripted::new(
        vec![
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(RES_DUPLICATE),
        ],
        None,
    );
    let (outcome, _) = run(&mut transport);
    assert_eq!(outcome, EnrollOutcome::Duplicate);
    assert_eq!(transport.reg_calls, vec![8, 0]);
}

#[test]
fn low_quality_consumes_attempt_and_retries() {
    let mut transport = Scripted::new(
        vec![
            event(PROGRESS),
            event(RES_LOW_QUALITY),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            event(PROGRESS),
            summary_event(50, 480, 1),
        ],
        Some(vec![7]),
    );
    let (outcome, seen) = run(&mut transport);
    assert!(matches!(outcome, EnrollOutcome::Completed { .. }));
    assert_eq!(
        seen,
        vec![
            EnrollProgress::Started,
            EnrollProgress::FingerDetected { attempt: 1 },
            EnrollProgress::LowQuality { attempt: 1 },
            EnrollProgress::FingerDetected { attempt: 1 },
            EnrollProgress::FingerProcessed { attempt: 1 },
            EnrollProgress::FingerDetected { attempt: 2 },
            EnrollProgress::FingerProcessed { attempt: 2 },
        ]
    );
}

#[test]
fn device_timeout_code_on_first_wait() {
    let mut transport = Scripted::new(vec![event(RES_TIMEOUT)], None);
    let (outcome, _) = run(&mut transport);
    assert_eq!(outcome, EnrollOutcome::Timeout);
}

#[test]
fn socket_timeout_maps_to_timeout() {
    let mut transport = Scripted::new(vec![Err(ZkError::EventTimeout)], None);
    let (outcome, _) = run(&mut transport);
    assert_eq!(outcome, EnrollOutcome::Timeout);
}

#[test]
fn code_four_after_short_wait_is_device_cancel() {
    // The scripted transport answers instantly, so the elapsed wait is far
    // under (timeout - 5s) and code 4 must read as CANCELLED.
    let mut transport = Scripted::new(vec![event(RES_CANCELLED)], None);
    let (outcome, _) = run(&mut transport);
    assert_eq!(outcome, EnrollOutcome::Cancelled);
}

#[test]
fn caller_cancel_flag_short_circuits() {
    let mut transport = Scripted::new(vec![event(PROGRESS)], None);
    let cancel = AtomicBool::new(false);
    cancel.store(true, Ordering::Relaxed);
    let mut seen = Vec::new();
    let outcome = run_enrollment(&mut transport, &params(), &cancel, &mut |p| seen.push(p));
    assert_eq!(outcome, EnrollOutcome::Cancelled);
    // No event frame was consumed and cleanup still ran.
    assert_eq!(transport.events.len(), 1);
    assert_eq!(transport.reg_calls, vec![8, 0]);
    assert!(transport.cancel_calls >= 1);
}

#[test]
fn verification_failure_downgrades_to_failed() {
    let mut transport = Scripted::new(vec![summary_event(RES_OK, 512, 1)], None);
    let (outcome, _) = run(&mut transport);
    match outcome {
        EnrollOutcome::Failed { reason } => assert!(reason.contains("verification failed")),
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[test]
fn code4_disambiguation_boundaries() {
    let timeout = Duration::from_secs(60);
    // Consumed nearly the whole window: inactivity timeout.
    assert!(code4_is_timeout(Duration::from_secs(55), timeout));
    assert!(code4_is_timeout(Duration::from_secs(60), timeout));
    // Short wait: a real cancel from the device keypad.
    assert!(!code4_is_timeout(Duration::from_secs(10), timeout));
    assert!(!code4_is_timeout(Duration::from_secs(54), timeout));
}
