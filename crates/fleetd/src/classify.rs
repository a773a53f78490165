// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entry/exit classification for attendance taps.
//!
//! Rules:
//!   1. No previous record today for the student: IN
//!   2. Gap since the previous record under the duplicate window: DUPLICATE
//!   3. Previous was IN, gap at or past the window: OUT
//!   4. Previous was OUT, gap at or past the window: IN
//!   5. Previous was UNKNOWN: IN (UNKNOWN carries no direction)

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;

use crate::repo::model::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    In,
    Out,
    Duplicate,
}

/// Pure per-student state function: previous tap plus now gives the verdict.
pub fn classify(
    previous: Option<&(EventType, DateTime<Utc>)>,
    now: DateTime<Utc>,
    window: Duration,
) -> Classification {
    let Some((prev_type, prev_at)) = previous else {
        return Classification::In;
    };
    if now - *prev_at < window {
        return Classification::Duplicate;
    }
    match prev_type {
        EventType::In => Classification::Out,
        EventType::Out | EventType::Unknown => Classification::In,
    }
}

/// Start of the calendar day containing `reference`, in the device timezone,
/// expressed in UTC. Classification history never crosses this boundary.
pub fn day_start_utc(reference: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_day = reference.with_timezone(&tz).date_naive();
    let midnight = local_day.and_hms_opt(0, 0, 0).unwrap_or_default();
    tz.from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
        .with_timezone(&Utc)
}
