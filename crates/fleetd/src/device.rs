// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session pool: one logical device session per device id.
//!
//! Sessions are created lazily, verified by a liveness probe when stale, and
//! torn down on failure with one reconnect attempt. Blocking protocol I/O
//! runs on the blocking thread pool; a per-device mutex keeps every session
//! single-writer. In simulation mode no sockets are opened at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use zkproto::{DeviceSession, ZkError};

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::events::DeviceInfoPayload;
use crate::pipeline::LogSource;
use crate::repo::model::{Device, DeviceId};

struct Slot {
    session: Option<DeviceSession>,
    last_verified: Option<Instant>,
}

pub struct SessionPool {
    timeout: Duration,
    liveness_ttl: Duration,
    simulation: bool,
    slots: Mutex<HashMap<DeviceId, Arc<tokio::sync::Mutex<Slot>>>>,
}

impl SessionPool {
    pub fn new(config: &FleetConfig) -> Self {
        Self {
            timeout: config.device_timeout(),
            liveness_ttl: config.liveness_ttl(),
            simulation: config.simulation_mode,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, device_id: DeviceId) -> Arc<tokio::sync::Mutex<Slot>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(device_id).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(Slot {
                session: None,
                last_verified: None,
            }))
        }))
    }

    /// Run one blocking operation against the device's session.
    ///
    /// Acquires the per-device lock, reuses the pooled session when its last
    /// liveness probe is fresh, re-probes a stale one, and reconnects once
    /// after tearing down a dead session. The closure runs on the blocking
    /// pool while the lock is held, so at most one caller touches a device
    /// at a time.
    pub async fn with_session<T, F>(&self, device: &Device, op: F) -> Result<T, FleetError>
    where
        F: FnOnce(&mut DeviceSession) -> zkproto::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.simulation {
            return Err(FleetError::DeviceOffline(device.id));
        }

        let slot = self.slot(device.id);
        let mut guard = slot.lock_owned().await;

        let stale = guard
            .last_verified
            .is_none_or(|at| at.elapsed() > self.liveness_ttl);
        let existing = guard.session.take();

        let host = device.host.clone();
        let port = device.port;
        let password = device.comm_password;
        let timeout = self.timeout;
        let device_id = device.id;

        let (session, outcome) = spawn_blocking(move || {
            let reusable = match existing {
                Some(session) if !stale => Some(session),
                Some(mut session) => {
                    if session.test_liveness() {
                        Some(session)
                    } else {
                        debug!(device_id, "stale session failed liveness probe, reconnecting");
                        session.disconnect();
                        None
                    }
                }
                None => None,
            };
            let mut session = match reusable {
                Some(session) => session,
                None => match DeviceSession::connect(&host, port, password, timeout) {
                    Ok(session) => session,
                    Err(e) => return (None, Err(e)),
                },
            };
            let outcome = op(&mut session);
            (Some(session), outcome)
        })
        .await
        .map_err(|e| FleetError::Internal(format!("blocking device task panicked: {e}")))?;

        match outcome {
            Ok(value) => {
                guard.session = session;
                guard.last_verified = Some(Instant::now());
                Ok(value)
            }
            Err(e) => {
                // Keep the session unless the socket itself failed.
                match e {
                    ZkError::ConnLost(_) | ZkError::ConnectTimeout { .. } => {
                        guard.session = None;
                        guard.last_verified = None;
                    }
                    _ => guard.session = session,
                }
                Err(e.into())
            }
        }
    }

    /// Liveness probe for the health loop. Never errors.
    pub async fn probe(&self, device: &Device) -> bool {
        if self.simulation {
            // Deterministic stub behavior: roughly nine in ten probes online.
            return rand::random::<f64>() > 0.1;
        }
        self.with_session(device, |session| Ok(session.test_liveness()))
            .await
            .unwrap_or(false)
    }

    /// Best-effort metadata snapshot; individual field failures are absorbed.
    pub async fn fetch_info(&self, device: &Device) -> Result<DeviceInfoPayload, FleetError> {
        if self.simulation {
            return Ok(DeviceInfoPayload::default());
        }
        self.with_session(device, |session| {
            Ok(DeviceInfoPayload {
                serial: session.get_serial().ok().flatten(),
                name: session.get_device_name().ok().flatten(),
                firmware: session.get_firmware().ok().flatten(),
                device_time: session
                    .get_time()
                    .ok()
                    .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
                capacity: session.get_free_sizes().ok().map(Into::into),
            })
        })
        .await
    }

    /// Disconnect everything; used at shutdown. Slots busy with an in-flight
    /// operation are skipped.
    pub async fn close_all(&self) {
        let slots: Vec<(DeviceId, Arc<tokio::sync::Mutex<Slot>>)> = {
            let map = self.slots.lock();
            map.iter().map(|(id, slot)| (*id, Arc::clone(slot))).collect()
        };
        for (device_id, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                warn!(device_id, "session busy at shutdown, leaving socket to the OS");
                continue;
            };
            if let Some(mut session) = guard.session.take() {
                let _ = spawn_blocking(move || session.disconnect()).await;
                debug!(device_id, "session closed");
            }
        }
        info!("session pool drained");
    }
}

#[async_trait]
impl LogSource for SessionPool {
    async fn fetch_attendance_logs(
        &self,
        device: &Device,
    ) -> Result<Vec<zkproto::AttendanceLog>, FleetError> {
        if self.simulation {
            return Ok(Vec::new());
        }
        self.with_session(device, |session| session.fetch_attendance_logs())
            .await
    }
}
