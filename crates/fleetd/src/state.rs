// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared daemon state, threaded explicitly through loops, pipeline and
//! transport. Nothing here is a global.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::ProcessedScanCache;
use crate::config::FleetConfig;
use crate::device::SessionPool;
use crate::hub::BroadcastHub;
use crate::pipeline::{IngestionPipeline, LogSource};
use crate::repo::devices::PgDeviceStore;
use crate::repo::enrollments::PgEnrollmentStore;
use crate::repo::attendance::PgAttendanceStore;
use crate::repo::students::PgStudentDirectory;
use crate::repo::templates::PgTemplateStore;
use crate::repo::{AttendanceStore, DeviceStore, EnrollmentStore, StudentDirectory, TemplateStore};
use crate::seal::{PassthroughSealer, TemplateSealer};

pub struct AppState {
    pub config: FleetConfig,
    pub shutdown: CancellationToken,
    pub hub: Arc<BroadcastHub>,
    pub pool: Arc<SessionPool>,
    pub devices: Arc<dyn DeviceStore>,
    pub enrollments: Arc<dyn EnrollmentStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub students: Arc<dyn StudentDirectory>,
    pub templates: Arc<dyn TemplateStore>,
    pub sealer: Arc<dyn TemplateSealer>,
    pub scan_cache: Arc<ProcessedScanCache>,
    pub logs: Arc<dyn LogSource>,
    pub enroll_cancels: CancelRegistry,
}

impl AppState {
    /// Production wiring: Postgres stores, real session pool.
    pub fn with_postgres(config: FleetConfig, db: PgPool, shutdown: CancellationToken) -> Self {
        let pool = Arc::new(SessionPool::new(&config));
        let scan_cache = Arc::new(ProcessedScanCache::new(config.processed_keys_max_per_device));
        Self {
            shutdown,
            hub: Arc::new(BroadcastHub::new()),
            logs: pool.clone(),
            pool,
            devices: Arc::new(PgDeviceStore::new(db.clone())),
            enrollments: Arc::new(PgEnrollmentStore::new(db.clone())),
            attendance: Arc::new(PgAttendanceStore::new(db.clone())),
            students: Arc::new(PgStudentDirectory::new(db.clone())),
            templates: Arc::new(PgTemplateStore::new(db)),
            sealer: Arc::new(PassthroughSealer),
            scan_cache,
            enroll_cancels: CancelRegistry::default(),
            config,
        }
    }

    /// Pipeline view over this state's stores and hub.
    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::clone(&self.devices),
            Arc::clone(&self.attendance),
            Arc::clone(&self.students),
            Arc::clone(&self.logs),
            Arc::clone(&self.hub),
            Arc::clone(&self.scan_cache),
            self.config.attendance_tz(),
            self.config.duplicate_window(),
        )
    }
}

/// Cancellation flags for in-flight enrollment runs, keyed by session uuid.
#[derive(Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl CancelRegistry {
    /// Register a run and get its flag.
    pub fn register(&self, session_uuid: Uuid) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.inner.lock().insert(session_uuid, Arc::clone(&flag));
        flag
    }

    /// Request cancellation; true when a matching run was active.
    pub fn cancel(&self, session_uuid: Uuid) -> bool {
        match self.inner.lock().get(&session_uuid) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, session_uuid: Uuid) {
        self.inner.lock().remove(&session_uuid);
    }
}
