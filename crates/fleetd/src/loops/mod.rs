// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet-wide background loops: health probing, device info sync and
//! attendance polling. Each loop runs until shutdown and always finishes its
//! in-flight round before exiting; one misbehaving device never halts a
//! round.

pub mod attendance_poll;
pub mod health;
pub mod info_sync;

use std::sync::Arc;

use crate::state::AppState;

/// Spawn all three control loops.
pub fn spawn_all(state: &Arc<AppState>) {
    health::spawn_health_loop(Arc::clone(state));
    info_sync::spawn_info_sync_loop(Arc::clone(state));
    attendance_poll::spawn_attendance_poll_loop(Arc::clone(state));
}
