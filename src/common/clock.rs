//! Time sources.
//!
//! MVCC never compares wall-clock readings: every snapshot and commit point
//! comes from a [`LogicalClock`], which is strictly monotonic and never ties.
//! Wall-clock time is only recorded in log entries for humans.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point on the logical clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Timestamp of data that predates every transaction.
    pub const ZERO: Timestamp = Timestamp(0);
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts{}", self.0)
    }
}

/// Strictly increasing counter. `tick` never returns the same value twice.
#[derive(Debug)]
pub struct LogicalClock {
    now: AtomicU64,
}

impl LogicalClock {
    /// Clock whose first tick is `Timestamp(1)`.
    pub fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Advance and return the new time.
    pub fn tick(&self) -> Timestamp {
        Timestamp(self.now.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last value handed out.
    pub fn current(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Microseconds since the UNIX epoch, saturating at 0 for clocks set before it.
pub fn wall_clock_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
