// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the fleet daemon.
#[derive(Debug, Clone, clap::Args)]
pub struct FleetConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "FLEETD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9320, env = "FLEETD_PORT")]
    pub port: u16,

    /// Postgres connection string.
    #[arg(long, env = "FLEETD_DATABASE_URL")]
    pub database_url: String,

    /// Bearer token for the HTTP/WebSocket API. If unset, auth is disabled.
    #[arg(long, env = "FLEETD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Device health probe interval in seconds.
    #[arg(long, default_value_t = 30, env = "FLEETD_HEALTH_INTERVAL_SECS")]
    pub health_interval_secs: u64,

    /// Device info sync interval in seconds.
    #[arg(long, default_value_t = 60, env = "FLEETD_INFO_SYNC_INTERVAL_SECS")]
    pub info_sync_interval_secs: u64,

    /// Attendance poll interval in seconds.
    #[arg(long, default_value_t = 15, env = "FLEETD_ATTENDANCE_POLL_INTERVAL_SECS")]
    pub attendance_poll_interval_secs: u64,

    /// Max devices polled for attendance concurrently.
    #[arg(long, default_value_t = 4, env = "FLEETD_ATTENDANCE_POLL_CONCURRENCY")]
    pub attendance_poll_concurrency: usize,

    /// Window within which consecutive taps by one student are duplicates.
    #[arg(long, default_value_t = 5, env = "FLEETD_ATTENDANCE_DUPLICATE_WINDOW_MINUTES")]
    pub attendance_duplicate_window_minutes: i64,

    /// IANA timezone the terminals keep their clocks in.
    #[arg(long, default_value = "Africa/Nairobi", env = "FLEETD_ATTENDANCE_TIMEZONE")]
    pub attendance_timezone: String,

    /// Socket connect/read timeout for device commands, in seconds.
    #[arg(long, default_value_t = 5, env = "FLEETD_DEFAULT_DEVICE_TIMEOUT_SECS")]
    pub default_device_timeout_secs: u64,

    /// Event-wait timeout for one enrollment run, in seconds.
    #[arg(long, default_value_t = 60, env = "FLEETD_ENROLL_TIMEOUT_SECS")]
    pub enroll_timeout_secs: u64,

    /// Finger presses per enrollment.
    #[arg(long, default_value_t = 3, env = "FLEETD_ENROLL_MAX_ATTEMPTS")]
    pub enroll_max_attempts: u8,

    /// Cap on remembered scan keys per device; trimmed to the newest half.
    #[arg(long, default_value_t = 5000, env = "FLEETD_PROCESSED_KEYS_MAX_PER_DEVICE")]
    pub processed_keys_max_per_device: usize,

    /// How long a liveness probe keeps a pooled session fresh, in seconds.
    #[arg(long, default_value_t = 30, env = "FLEETD_LIVENESS_TTL_SECS")]
    pub liveness_ttl_secs: u64,

    /// Replace device I/O with a deterministic stub; no sockets are opened.
    #[arg(long, default_value_t = false, env = "FLEETD_SIMULATION_MODE")]
    pub simulation_mode: bool,
}

impl FleetConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn info_sync_interval(&self) -> Duration {
        Duration::from_secs(self.info_sync_interval_secs)
    }

    pub fn attendance_poll_interval(&self) -> Duration {
        Duration::from_secs(self.attendance_poll_interval_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.default_device_timeout_secs)
    }

    pub fn enroll_timeout(&self) -> Duration {
        Duration::from_secs(self.enroll_timeout_secs)
    }

    pub fn liveness_ttl(&self) -> Duration {
        Duration::from_secs(self.liveness_ttl_secs)
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.attendance_duplicate_window_minutes)
    }

    /// Parse the configured timezone, falling back to UTC with a warning.
    pub fn attendance_tz(&self) -> chrono_tz::Tz {
        match self.attendance_timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(
                    timezone = %self.attendance_timezone,
                    "unknown attendance timezone, falling back to UTC"
                );
                chrono_tz::Tz::UTC
            }
        }
    }
}
