// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic attendance ingestion across online devices, bounded by a
//! concurrency semaphore.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::repo::model::{Device, DeviceStatus};
use crate::state::AppState;

pub fn spawn_attendance_poll_loop(state: Arc<AppState>) {
    let interval = state.config.attendance_poll_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            run_round(&state).await;
        }
        debug!("attendance poll loop stopped");
    });
}

/// One poll round: every online device goes through the ingestion pipeline
/// under the semaphore; per-device failures are logged and swallowed.
pub async fn run_round(state: &AppState) {
    let devices = match state.devices.list_active().await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(err = %e, "attendance round could not list devices");
            return;
        }
    };
    let online: Vec<Device> = devices
        .into_iter()
        .filter(|d| d.status == DeviceStatus::Online)
        .collect();
    if online.is_empty() {
        debug!("no online devices to poll");
        return;
    }

    let pipeline = state.pipeline();
    let semaphore = Arc::new(Semaphore::new(state.config.attendance_poll_concurrency));

    let results = join_all(online.iter().map(|device| {
        let semaphore = Arc::clone(&semaphore);
        let pipeline = &pipeline;
        async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return None;
            };
            match pipeline.ingest_for_device(device.tenant_id, device.id).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(device_id = device.id, err = %e, "attendance poll failed for device");
                    None
                }
            }
        }
    }))
    .await;

    let inserted: u64 = results.iter().flatten().map(|s| s.inserted).sum();
    let errors = results.iter().filter(|r| r.is_none()).count();
    info!(
        polled = results.len(),
        inserted,
        errors,
        "attendance poll round complete"
    );
}
