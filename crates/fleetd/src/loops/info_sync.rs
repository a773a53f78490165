// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic device metadata sync for online devices.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::events::InfoEvent;
use crate::hub::Channel;
use crate::repo::model::{Device, DeviceStatus};
use crate::state::AppState;

pub fn spawn_info_sync_loop(state: Arc<AppState>) {
    let interval = state.config.info_sync_interval();

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
        debug!("info sync loop stopped");
    });
}

/// One sync round across online devices. Per-device failures are swallowed.
pub async fn run_round(state: &AppState) {
    let devices = match state.devices.list_active().await {
        Ok(devices) => devices,
        Err(e) => {
            warn!(err = %e, "info sync round could not list devices");
            return;
        }
    };
    let online: Vec<Device> = devices
        .into_iter()
        .filter(|d| d.status == DeviceStatus::Online)
        .collect();
    if online.is_empty() {
        debug!("no online devices to sync");
        return;
    }

    let results = join_all(online.iter().map(|device| sync_device(state, device))).await;
    let synced = results.iter().filter(|&&ok| ok).count();
    info!(
        attempted = results.len(),
        synced,
        failed = results.len() - synced,
        "info sync round complete"
    );
}

async fn sync_device(state: &AppState, device: &Device) -> bool {
    let info = match state.pool.fetch_info(device).await {
        Ok(info) => info,
        Err(e) => {
            warn!(device_id = device.id, err = %e, "device info fetch failed");
            return false;
        }
    };
    if info.is_empty() {
        debug!(device_id = device.id, "device returned no information");
        return false;
    }

    // Learn the serial once; it is the device's stable identity.
    if device.serial.is_none() {
        if let Some(serial) = &info.serial {
            if let Err(e) = state.devices.set_serial(device.id, serial).await {
                warn!(device_id = device.id, err = %e, "failed to persist serial");
            }
        }
    }
    // Track reported user capacity when the firmware exposes it.
    if let Some(capacity) = &info.capacity {
        if capacity.users_cap > 0 {
            let max_users = capacity.users_cap as i32;
            if device.max_users != Some(max_users) {
                if let Err(e) = state.devices.set_max_users(device.id, max_users).await {
                    warn!(device_id = device.id, err = %e, "failed to persist max_users");
                }
            }
        }
    }

    state
        .hub
        .publish(
            Channel::DeviceInfo,
            device.tenant_id,
            &InfoEvent::DeviceInfoUpdate {
                device_id: device.id,
                info,
                timestamp: Utc::now(),
            },
        )
        .await;
    true
}
