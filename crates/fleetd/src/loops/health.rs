// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background health checker for every registered device.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::events::StatusEvent;
use crate::hub::Channel;
use crate::repo::model::{Device, DeviceStatus};
use crate::state::AppState;

/// Spawn the periodic health probe loop.
pub fn spawn_health_loop(state: Arc<AppState>) {
    let interval = state.config.health_interval();

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
        debug!("health loop stopped");
    });
}

/// One probe round across all non-deleted devices.
pub async fn run_round(state: &AppState) {
    let devices = match state.devices.list_active().await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(err = %e, "health round could not list devices");
            return;
        }
    };
    if devices.is_empty() {
        debug!("no devices to probe");
        return;
    }

    let results = join_all(devices.iter().map(|device| check_device(state, device))).await;
    let online = results.iter().filter(|&&up| up).count();
    info!(
        probed = results.len(),
        online,
        offline = results.len() - online,
        "health round complete"
    );
}

async fn check_device(state: &AppState, device: &Device) -> bool {
    let up = state.pool.probe(device).await;
    let status = if up {
        DeviceStatus::Online
    } else {
        DeviceStatus::Offline
    };
    // Going offline keeps the last known-online timestamp.
    let last_seen = up.then(Utc::now);

    if let Err(e) = state.devices.update_status(device.id, status, last_seen).await {
        warn!(device_id = device.id, err = %e, "failed to persist device status");
        return up;
    }

    state
        .hub
        .publish(
            Channel::DeviceStatus,
            device.tenant_id,
            &StatusEvent::DeviceStatusUpdate {
                device_id: device.id,
                status,
                last_seen: last_seen.or(device.last_seen),
                timestamp: Utc::now(),
            },
        )
        .await;
    up
}
