// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ZKTeco fingerprint terminal protocol client.
//!
//! Implements the vendor's proprietary command protocol at three layers:
//! the wire codec ([`codec`]), a blocking single-socket session
//! ([`session`]), and the interactive multi-press enrollment state machine
//! ([`enroll`]). All I/O here is blocking by design; async callers wrap
//! session operations in `spawn_blocking`.

pub mod codec;
pub mod enroll;
pub mod error;
pub mod session;

#[cfg(test)]
mod enroll_tests;

pub use error::{Result, ZkError};
pub use session::{AttendanceLog, DeviceSession, DeviceUser, Event};
