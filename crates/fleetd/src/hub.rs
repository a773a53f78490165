// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-tenant fan-out of the four real-time event streams.
//!
//! The hub buffers nothing: an event published with no subscribers is gone.
//! Within one publish, sinks are written in registration order; a sink whose
//! send fails is dropped from the set and never observes another event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::repo::model::TenantId;

/// The four broadcast channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    DeviceStatus,
    DeviceInfo,
    Enrollment,
    AttendanceScans,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::DeviceStatus,
        Channel::DeviceInfo,
        Channel::Enrollment,
        Channel::AttendanceScans,
    ];

    fn index(self) -> usize {
        match self {
            Self::DeviceStatus => 0,
            Self::DeviceInfo => 1,
            Self::Enrollment => 2,
            Self::AttendanceScans => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeviceStatus => "device-status",
            Self::DeviceInfo => "device-info",
            Self::Enrollment => "enrollment-progress",
            Self::AttendanceScans => "attendance-scans",
        }
    }
}

/// An already-accepted subscriber sink. The WebSocket wrapper is the
/// production implementation; tests record into memory.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
}

type SinkSet = IndexMap<u64, Arc<dyn EventSink>>;
type TenantSubs = HashMap<TenantId, SinkSet>;

pub struct BroadcastHub {
    next_id: AtomicU64,
    channels: [RwLock<TenantSubs>; 4],
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            channels: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    /// Register a sink; the returned id is the handle for `unsubscribe`.
    pub async fn subscribe(
        &self,
        channel: Channel,
        tenant: TenantId,
        sink: Arc<dyn EventSink>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.channels[channel.index()].write().await;
        let set = subs.entry(tenant).or_default();
        set.insert(id, sink);
        debug!(
            channel = channel.as_str(),
            tenant_id = tenant,
            subscribers = set.len(),
            "subscriber registered"
        );
        id
    }

    pub async fn unsubscribe(&self, channel: Channel, tenant: TenantId, id: u64) {
        let mut subs = self.channels[channel.index()].write().await;
        if let Some(set) = subs.get_mut(&tenant) {
            set.shift_remove(&id);
            if set.is_empty() {
                subs.remove(&tenant);
            }
        }
    }

    /// Fan an event out to every subscriber of `(channel, tenant)`.
    ///
    /// Serialization happens once; failed sinks are removed atomically with
    /// the failure and no error propagates to the caller.
    pub async fn publish<E: Serialize>(&self, channel: Channel, tenant: TenantId, event: &E) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                warn!(channel = channel.as_str(), err = %e, "unserializable broadcast event");
                return;
            }
        };

        let targets: Vec<(u64, Arc<dyn EventSink>)> = {
            let subs = self.channels[channel.index()].read().await;
            match subs.get(&tenant) {
                Some(set) => set.iter().map(|(id, sink)| (*id, Arc::clone(sink))).collect(),
                None => {
                    debug!(
                        channel = channel.as_str(),
                        tenant_id = tenant,
                        "no subscribers, dropping event"
                    );
                    return;
                }
            }
        };

        let mut dead = Vec::new();
        for (id, sink) in &targets {
            if let Err(e) = sink.send_text(&text).await {
                warn!(
                    channel = channel.as_str(),
                    tenant_id = tenant,
                    subscriber = id,
                    err = %e,
                    "subscriber send failed, removing"
                );
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            let mut subs = self.channels[channel.index()].write().await;
            if let Some(set) = subs.get_mut(&tenant) {
                for id in dead {
                    set.shift_remove(&id);
                }
                if set.is_empty() {
                    subs.remove(&tenant);
                }
            }
        }
    }

    /// Subscriber count, for one tenant or across all of them.
    pub async fn count(&self, channel: Channel, tenant: Option<TenantId>) -> usize {
        let subs = self.channels[channel.index()].read().await;
        match tenant {
            Some(tenant) => subs.get(&tenant).map_or(0, IndexMap::len),
            None => subs.values().map(IndexMap::len).sum(),
        }
    }
}
