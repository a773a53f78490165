// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Attendance ingestion pipeline.
//!
//! fetch, dedupe against the database and the processed-scan cache, resolve
//! taps to students, classify IN/OUT/DUPLICATE in chronological order,
//! persist the non-duplicates in one transaction, then broadcast every scan
//! to the live feed. Broadcast and cache updates are post-commit and
//! best-effort; everything before the commit re-raises so the next poll can
//! retry cleanly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ProcessedScanCache;
use crate::classify::{classify, day_start_utc, Classification};
use crate::error::FleetError;
use crate::events::{LiveEventType, LiveScan, ScanFeedEvent};
use crate::hub::{BroadcastHub, Channel};
use crate::repo::model::{
    Device, DeviceId, DeviceStatus, EventType, NewAttendanceRecord, ScanKey, StudentId, TenantId,
};
use crate::repo::{AttendanceStore, DeviceStore, StudentDirectory};

/// Where raw logs come from. The session pool is the production source;
/// scenario tests script their own.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch_attendance_logs(
        &self,
        device: &Device,
    ) -> Result<Vec<zkproto::AttendanceLog>, FleetError>;
}

/// Outcome of one ingestion round for one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    pub inserted: u64,
    pub skipped: usize,
    pub duplicates_filtered: usize,
    pub total: usize,
}

pub struct IngestionPipeline {
    devices: Arc<dyn DeviceStore>,
    attendance: Arc<dyn AttendanceStore>,
    students: Arc<dyn StudentDirectory>,
    logs: Arc<dyn LogSource>,
    hub: Arc<BroadcastHub>,
    cache: Arc<ProcessedScanCache>,
    tz: Tz,
    window: chrono::Duration,
}

/// One localized tap partway through the pipeline.
struct Tap {
    device_user_id: String,
    occurred_at: DateTime<Utc>,
    punch: u8,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        attendance: Arc<dyn AttendanceStore>,
        students: Arc<dyn StudentDirectory>,
        logs: Arc<dyn LogSource>,
        hub: Arc<BroadcastHub>,
        cache: Arc<ProcessedScanCache>,
        tz: Tz,
        window: chrono::Duration,
    ) -> Self {
        Self {
            devices,
            attendance,
            students,
            logs,
            hub,
            cache,
            tz,
            window,
        }
    }

    /// Run one ingestion round for one device.
    pub async fn ingest_for_device(
        &self,
        tenant: TenantId,
        device_id: DeviceId,
    ) -> Result<IngestionSummary, FleetError> {
        let device = self
            .devices
            .get(tenant, device_id)
            .await?
            .ok_or(FleetError::DeviceNotFound(device_id))?;
        if device.status != DeviceStatus::Online {
            return Err(FleetError::DeviceOffline(device_id));
        }

        // 1. Fetch raw logs; attach the device timezone and convert to UTC.
        let raw = self.logs.fetch_attendance_logs(&device).await?;
        let total = raw.len();
        if total == 0 {
            return Ok(IngestionSummary::default());
        }
        let taps: Vec<Tap> = raw
            .into_iter()
            .map(|log| Tap {
                device_user_id: log.user_id,
                occurred_at: self.localize(log.timestamp),
                punch: log.punch,
            })
            .collect();

        // 2. Dedup: keys already stored, plus keys remembered by the cache
        //    (DUPLICATE taps are never stored but must not re-broadcast).
        let keys: Vec<ScanKey> = taps
            .iter()
            .map(|t| (t.device_user_id.clone(), t.occurred_at))
            .collect();
        let in_db = self
            .attendance
            .find_existing_keys(tenant, device_id, &keys)
            .await?;
        let in_cache = self.cache.already_seen(device_id, &keys);
        let already_seen: HashSet<ScanKey> = in_db.union(&in_cache).cloned().collect();
        let skipped = already_seen.len();

        // 3. Keep the genuinely new taps, chronologically. Classification
        //    depends on this order.
        let mut fresh: Vec<Tap> = taps
            .into_iter()
            .filter(|t| !already_seen.contains(&(t.device_user_id.clone(), t.occurred_at)))
            .collect();
        fresh.sort_by_key(|t| t.occurred_at);
        if fresh.is_empty() {
            return Ok(IngestionSummary {
                inserted: 0,
                skipped,
                duplicates_filtered: 0,
                total,
            });
        }

        // 4. Resolve device user ids to students under this tenant.
        let resolved = self.resolve_students(tenant, &fresh).await?;

        // 5. Seed per-student history with the last record today, one query.
        let mut history = {
            let matched: Vec<StudentId> = {
                let mut ids: Vec<StudentId> = resolved.values().copied().collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            };
            let day_start = day_start_utc(fresh[0].occurred_at, self.tz);
            self.attendance
                .last_records_for_students(tenant, &matched, day_start)
                .await?
        };

        // 6. Classify in order; duplicates go to the feed only.
        let mut to_insert: Vec<NewAttendanceRecord> = Vec::new();
        let mut feed: Vec<(Option<StudentId>, LiveEventType, DateTime<Utc>)> = Vec::new();
        let mut duplicates_filtered = 0usize;

        for tap in &fresh {
            let student = resolved.get(&tap.device_user_id).copied();
            let (event_type, live) = match student {
                None => (Some(EventType::Unknown), LiveEventType::Unknown),
                Some(student_id) => {
                    match classify(history.get(&student_id), tap.occurred_at, self.window) {
                        Classification::Duplicate => {
                            duplicates_filtered += 1;
                            (None, LiveEventType::Duplicate)
                        }
                        Classification::In => {
                            history.insert(student_id, (EventType::In, tap.occurred_at));
                            (Some(EventType::In), LiveEventType::In)
                        }
                        Classification::Out => {
                            history.insert(student_id, (EventType::Out, tap.occurred_at));
                            (Some(EventType::Out), LiveEventType::Out)
                        }
                    }
                }
            };
            feed.push((student, live, tap.occurred_at));
            if let Some(event_type) = event_type {
                to_insert.push(NewAttendanceRecord {
                    tenant_id: tenant,
                    device_id,
                    student_id: student,
                    device_user_id: tap.device_user_id.clone(),
                    occurred_at: tap.occurred_at,
                    event_type,
                    raw_payload: Some(serde_json::json!({
                        "punch": tap.punch,
                        "device_serial": device.serial,
                    })),
                });
            }
        }

        // 7. Persist in one transaction. Failures propagate; nothing below
        //    this line may fail the round.
        let inserted = self.attendance.bulk_insert(&to_insert).await?;

        // 8. One live-feed message carrying every classified scan.
        if let Err(e) = self.broadcast_feed(tenant, &device, &feed).await {
            warn!(device_id, err = %e, "attendance feed broadcast failed");
        }

        // 9. Remember every processed key so replays are absorbed.
        self.cache.record(
            device_id,
            fresh
                .iter()
                .map(|t| (t.device_user_id.clone(), t.occurred_at)),
        );

        let summary = IngestionSummary {
            inserted,
            skipped,
            duplicates_filtered,
            total,
        };
        info!(
            device_id,
            inserted = summary.inserted,
            skipped = summary.skipped,
            duplicates_filtered = summary.duplicates_filtered,
            total = summary.total,
            "ingestion round complete"
        );
        Ok(summary)
    }

    /// Naive device-local timestamp to UTC via the configured zone.
    fn localize(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&naive))
            .with_timezone(&Utc)
    }

    /// Device user ids are written as `str(student_id)` during sync, so
    /// resolution is an integer parse plus a tenant existence check.
    async fn resolve_students(
        &self,
        tenant: TenantId,
        taps: &[Tap],
    ) -> Result<HashMap<String, StudentId>, FleetError> {
        let mut candidates: HashMap<StudentId, String> = HashMap::new();
        for tap in taps {
            match tap.device_user_id.parse::<StudentId>() {
                Ok(id) => {
                    candidates.insert(id, tap.device_user_id.clone());
                }
                Err(_) => {
                    debug!(device_user_id = %tap.device_user_id, "non-numeric device user id");
                }
            }
        }
        if candidates.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<StudentId> = candidates.keys().copied().collect();
        let existing = self.students.find_existing(tenant, &ids).await?;
        Ok(candidates
            .into_iter()
            .filter(|(id, _)| existing.contains(id))
            .map(|(id, device_user_id)| (device_user_id, id))
            .collect())
    }

    async fn broadcast_feed(
        &self,
        tenant: TenantId,
        device: &Device,
        feed: &[(Option<StudentId>, LiveEventType, DateTime<Utc>)],
    ) -> Result<(), FleetError> {
        let matched: Vec<StudentId> = {
            let mut ids: Vec<StudentId> = feed.iter().filter_map(|(s, _, _)| *s).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let profiles = self.students.profiles(tenant, &matched).await?;

        let events: Vec<LiveScan> = feed
            .iter()
            .map(|(student, live, occurred_at)| {
                let profile = student.and_then(|id| profiles.get(&id));
                LiveScan {
                    id: Uuid::new_v4(),
                    student_id: *student,
                    student_name: profile.map(|p| p.full_name.clone()),
                    admission_number: profile.map(|p| p.admission_number.clone()),
                    class_name: profile.and_then(|p| p.class_name.clone()),
                    device_id: device.id,
                    device_name: device.name.clone(),
                    event_type: *live,
                    occurred_at: *occurred_at,
                }
            })
            .collect();

        let message = ScanFeedEvent::AttendanceEvents {
            count: events.len(),
            events,
            timestamp: Utc::now(),
        };
        self.hub.publish(Channel::AttendanceScans, tenant, &message).await;
        Ok(())
    }
}
