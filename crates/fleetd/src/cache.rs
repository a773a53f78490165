// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device memory of processed scan keys.
//!
//! The terminals return their whole log on every poll. Database dedup catches
//! stored records, but DUPLICATE taps are broadcast and never stored, so
//! without this cache they would re-broadcast on every cycle.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::repo::model::{DeviceId, ScanKey};

pub struct ProcessedScanCache {
    cap: usize,
    inner: Mutex<HashMap<DeviceId, HashSet<ScanKey>>>,
}

impl ProcessedScanCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Which of `keys` this device has already processed in a recent poll.
    pub fn already_seen(&self, device: DeviceId, keys: &[ScanKey]) -> HashSet<ScanKey> {
        let inner = self.inner.lock();
        match inner.get(&device) {
            Some(seen) => keys.iter().filter(|k| seen.contains(*k)).cloned().collect(),
            None => HashSet::new(),
        }
    }

    /// Remember processed keys. Past the cap the set is trimmed to the
    /// newest half by timestamp.
    pub fn record<I: IntoIterator<Item = ScanKey>>(&self, device: DeviceId, keys: I) {
        let mut inner = self.inner.lock();
        let seen = inner.entry(device).or_default();
        seen.extend(keys);
        if seen.len() > self.cap {
            let mut sorted: Vec<ScanKey> = seen.drain().collect();
            sorted.sort_by_key(|(_, ts)| *ts);
            let keep_from = sorted.len() - self.cap / 2;
            seen.extend(sorted.into_iter().skip(keep_from));
        }
    }

    #[cfg(test)]
    fn len(&self, device: DeviceId) -> usize {
        self.inner.lock().get(&device).map_or(0, HashSet::len)
    }
}
