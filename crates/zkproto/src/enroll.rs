// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-press enrollment state machine.
//!
//! Drives the device's capture ritual: two event frames per press (finger
//! detected, finger processed), up to `max_attempts` presses, then one final
//! summary frame. The driver never opens a socket; it consumes whatever
//! transport it is handed, which makes it scriptable in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::codec::{events, le_u16};
use crate::error::{Result, ZkError};
use crate::session::{DeviceSession, Event};

// Result codes observed in enrollment event frames.
pub const RES_OK: u16 = 0;
pub const RES_CANCELLED: u16 = 4;
pub const RES_DUPLICATE: u16 = 5;
pub const RES_TIMEOUT: u16 = 6;
pub const RES_LOW_QUALITY: u16 = 0x64;

/// Margin under the event timeout within which a code-4 frame is read as an
/// inactivity timeout rather than an operator cancel.
const CANCEL_MARGIN: Duration = Duration::from_secs(5);

/// What the driver needs from a session. `DeviceSession` is the production
/// implementation.
pub trait EnrollTransport {
    fn start_enrollment(&mut self, user_id: &str, finger_index: u8) -> Result<()>;
    fn register_events(&mut self, mask: u32) -> Result<()>;
    fn cancel_capture(&mut self);
    fn recv_event(&mut self, timeout: Duration) -> Result<Event>;
    fn get_template_bytes(&mut self, user_id: &str, finger_index: u8) -> Result<Option<Vec<u8>>>;
}

impl EnrollTransport for DeviceSession {
    fn start_enrollment(&mut self, user_id: &str, finger_index: u8) -> Result<()> {
        DeviceSession::start_enrollment(self, user_id, finger_index)
    }

    fn register_events(&mut self, mask: u32) -> Result<()> {
        DeviceSession::register_events(self, mask)
    }

    fn cancel_capture(&mut self) {
        DeviceSession::cancel_capture(self);
    }

    fn recv_event(&mut self, timeout: Duration) -> Result<Event> {
        DeviceSession::recv_event(self, timeout)
    }

    fn get_template_bytes(&mut self, user_id: &str, finger_index: u8) -> Result<Option<Vec<u8>>> {
        DeviceSession::get_template_bytes(self, user_id, finger_index)
    }
}

#[derive(Debug, Clone)]
pub struct EnrollParams {
    pub user_id: String,
    pub finger_index: u8,
    /// Event-wait timeout; the socket is retuned to this for each wait.
    pub timeout: Duration,
    pub max_attempts: u8,
}

/// Fine-grained progress, emitted in order to the subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollProgress {
    Started,
    FingerDetected { attempt: u8 },
    FingerProcessed { attempt: u8 },
    LowQuality { attempt: u8 },
}

/// Terminal result of one enrollment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Completed {
        template: Vec<u8>,
        size: u16,
        position: u16,
    },
    Duplicate,
    Timeout,
    Cancelled,
    Failed {
        reason: String,
    },
}

/// Decide whether a code-4 frame means TIMEOUT or CANCELLED.
///
/// The device reports both with the same code; a wait that consumed at least
/// `timeout - 5s` can only be inactivity.
pub fn code4_is_timeout(elapsed: Duration, timeout: Duration) -> bool {
    elapsed >= timeout.saturating_sub(CANCEL_MARGIN)
}

/// Run one enrollment to a terminal outcome.
///
/// Always deregisters events and cancels capture on the way out, on every
/// path. A successful summary is verified by reading the template back; a
/// missing template downgrades the result to `Failed`.
pub fn run_enrollment<T: EnrollTransport + ?Sized>(
    transport: &mut T,
    params: &EnrollParams,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(EnrollProgress),
) -> EnrollOutcome {
    on_progress(EnrollProgress::Started);

    if let Err(e) = transport.register_events(events::EF_ENROLLFINGER) {
        cleanup(transport);
        return EnrollOutcome::Failed {
            reason: format!("event registration failed: {e}"),
        };
    }
    if let Err(e) = transport.start_enrollment(&params.user_id, params.finger_index) {
        cleanup(transport);
        return EnrollOutcome::Failed {
            reason: format!("failed to start capture: {e}"),
        };
    }

    let raw = drive(transport, params, cancel, on_progress);
    cleanup(transport);

    match raw {
        Raw::Success { size, position } => verify(transport, params, size, position),
        Raw::Duplicate => EnrollOutcome::Duplicate,
        Raw::Timeout => EnrollOutcome::Timeout,
        Raw::Cancelled => EnrollOutcome::Cancelled,
        Raw::Failed(reason) => EnrollOutcome::Failed { reason },
    }
}

enum Raw {
    Success { size: u16, position: u16 },
    Duplicate,
    Timeout,
    Cancelled,
    Failed(String),
}

fn drive<T: EnrollTransport + ?Sized>(
    transport: &mut T,
    params: &EnrollParams,
    cancel: &AtomicBool,
    on_progress: &mut dyn FnMut(EnrollProgress),
) -> Raw {
    let mut attempts_remaining = params.max_attempts;
    let mut attempt: u8 = 1;

    while attempts_remaining > 0 {
        if cancel.load(Ordering::Relaxed) {
            return Raw::Cancelled;
        }

        let wait_start = Instant::now();

        // First frame of the press: finger placed on the scanner.
        let event = match transport.recv_event(params.timeout) {
            Ok(event) => event,
            Err(ZkError::EventTimeout) => return Raw::Timeout,
            Err(e) => return Raw::Failed(e.to_string()),
        };
        match event.code {
            Some(RES_OK) => return summary(&event),
            Some(RES_CANCELLED) => return code4(wait_start.elapsed(), params.timeout),
            Some(RES_TIMEOUT) => return Raw::Timeout,
            Some(RES_DUPLICATE) => return Raw::Duplicate,
            _ => {}
        }
        on_progress(EnrollProgress::FingerDetected { attempt });

        if cancel.load(Ordering::Relaxed) {
            return Raw::Cancelled;
        }

        // Second frame: the device has processed the press.
        let event = match transport.recv_event(params.timeout) {
            Ok(event) => event,
            Err(ZkError::EventTimeout) => return Raw::Timeout,
            Err(e) => return Raw::Failed(e.to_string()),
        };
        match event.code {
            Some(RES_CANCELLED) => return code4(wait_start.elapsed(), params.timeout),
            Some(RES_TIMEOUT) => return Raw::Timeout,
            Some(RES_DUPLICATE) => return Raw::Duplicate,
            Some(RES_LOW_QUALITY) => {
                debug!(attempt, "low quality read, retrying");
                on_progress(EnrollProgress::LowQuality { attempt });
                attempts_remaining -= 1;
                continue;
            }
            _ => {}
        }
        on_progress(EnrollProgress::FingerProcessed { attempt });
        attempts_remaining -= 1;
        attempt += 1;
    }

    if cancel.load(Ordering::Relaxed) {
        return Raw::Cancelled;
    }

    // Summary frame after the presses. Firmware reports success with code 0
    // but also with model-specific codes (46, 50, 54, 55 observed); only
    // 4, 5 and 6 are failures here.
    let event = match transport.recv_event(params.timeout) {
        Ok(event) => event,
        Err(ZkError::EventTimeout) => return Raw::Timeout,
        Err(e) => return Raw::Failed(e.to_string()),
    };
    match event.code {
        Some(RES_DUPLICATE) => Raw::Duplicate,
        Some(RES_CANCELLED) | Some(RES_TIMEOUT) => Raw::Timeout,
        _ => summary(&event),
    }
}

/// Extract `{size, position}` from a success summary frame.
fn summary(event: &Event) -> Raw {
    Raw::Success {
        size: le_u16(&event.payload, 2).unwrap_or(0),
        position: le_u16(&event.payload, 4).unwrap_or(0),
    }
}

fn code4(elapsed: Duration, timeout: Duration) -> Raw {
    if code4_is_timeout(elapsed, timeout) {
        Raw::Timeout
    } else {
        Raw::Cancelled
    }
}

fn verify<T: EnrollTransport + ?Sized>(
    transport: &mut T,
    params: &EnrollParams,
    size: u16,
    position: u16,
) -> EnrollOutcome {
    match transport.get_template_bytes(&params.user_id, params.finger_index) {
        Ok(Some(template)) => EnrollOutcome::Completed {
            template,
            size,
            position,
        },
        Ok(None) => EnrollOutcome::Failed {
            reason: "verification failed: template not found on device".to_string(),
        },
        Err(e) => EnrollOutcome::Failed {
            reason: format!("verification failed: {e}"),
        },
    }
}

fn cleanup<T: EnrollTransport + ?Sized>(transport: &mut T) {
    if let Err(e) = transport.register_events(0) {
        debug!(err = %e, "event deregistration failed during cleanup");
    }
    transport.cancel_capture();
}
