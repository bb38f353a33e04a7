//! Per-key access tracking for tier migration.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Access {
    count: u64,
    last: Instant,
}

/// Read counts and last-read times per key.
#[derive(Debug, Default)]
pub struct AccessTracker {
    keys: HashMap<Vec<u8>, Access>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one read of `key` at `now`. Returns the new count.
    pub fn record(&mut self, key: &[u8], now: Instant) -> u64 {
        let access = self
            .keys
            .entry(key.to_vec())
            .or_insert(Access { count: 0, last: now });
        access.count += 1;
        access.last = now;
        access.count
    }

    pub fn count(&self, key: &[u8]) -> u64 {
        self.keys.get(key).map_or(0, |a| a.count)
    }

    /// Whether `key` has not been read within `age` of `now`.
    ///
    /// A key never read counts as idle.
    pub fn is_idle(&self, key: &[u8], age: Duration, now: Instant) -> bool {
        self.keys
            .get(key)
            .is_none_or(|a| now.saturating_duration_since(a.last) >= age)
    }

    /// Forget everything about `key`.
    pub fn reset(&mut self, key: &[u8]) {
        self.keys.remove(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
