// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-demand device metadata operations.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::spawn_blocking;

use zkproto::DeviceSession;

use crate::error::FleetError;
use crate::events::DeviceInfoPayload;
use crate::repo::model::{DeviceId, TenantId};
use crate::state::AppState;

/// Fetch `{serial, name, firmware, time, capacity}` from a device.
pub async fn get_device_info(
    state: &AppState,
    tenant: TenantId,
    device_id: DeviceId,
) -> Result<DeviceInfoPayload, FleetError> {
    let device = state
        .devices
        .get(tenant, device_id)
        .await?
        .ok_or(FleetError::DeviceNotFound(device_id))?;
    state.pool.fetch_info(&device).await
}

#[derive(Debug, Clone, Serialize)]
pub struct TestDeviceResult {
    pub ok: bool,
    pub message: String,
    pub response_ms: u64,
}

/// Reachability check with a caller-supplied timeout.
///
/// Uses a throwaway connection rather than the pooled session so a wedged
/// session cannot make an unreachable device look reachable or vice versa.
pub async fn test_device(
    state: &AppState,
    tenant: TenantId,
    device_id: DeviceId,
    timeout: Option<Duration>,
) -> Result<TestDeviceResult, FleetError> {
    let device = state
        .devices
        .get(tenant, device_id)
        .await?
        .ok_or(FleetError::DeviceNotFound(device_id))?;

    if state.config.simulation_mode {
        return Ok(TestDeviceResult {
            ok: true,
            message: "simulation mode".to_owned(),
            response_ms: 0,
        });
    }

    let timeout = timeout.unwrap_or_else(|| state.config.device_timeout());
    let host = device.host.clone();
    let port = device.port;
    let password = device.comm_password;

    let started = Instant::now();
    let outcome = spawn_blocking(move || {
        let mut session = DeviceSession::connect(&host, port, password, timeout)?;
        let time = session.get_time();
        session.disconnect();
        time
    })
    .await
    .map_err(|e| FleetError::Internal(format!("blocking device task panicked: {e}")))?;
    let response_ms = started.elapsed().as_millis() as u64;

    Ok(match outcome {
        Ok(device_time) => TestDeviceResult {
            ok: true,
            message: format!("device time {device_time}"),
            response_ms,
        },
        Err(e) => TestDeviceResult {
            ok: false,
            message: e.to_string(),
            response_ms,
        },
    })
}
