//! Two-tier storage: a hot B-tree over a cold LSM tree.
//!
//! ```text
//!   get ──► hot (BTree) ──miss──► cold (LsmTree)
//!              ▲                      │
//!              │  promote: read count │ reaches hot_threshold
//!              └──────────────────────┘
//!              │  demote: idle longer than cold_age_threshold (rebalance)
//!              └─────────────────────►
//! ```
//!
//! New keys land in the cold tier. A key lives in exactly one tier except
//! during a migration, which copies first and removes second, so a reader
//! racing a migration finds the key in at least one tier.

mod tracker;

pub use tracker::AccessTracker;

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::common::config::StorageConfig;
use crate::common::Result;
use crate::index::btree::BTreeBackend;
use crate::index::lsm::LsmTree;
use crate::index::StorageBackend;

/// Point-in-time hybrid counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HybridStats {
    pub reads: u64,
    pub writes: u64,
    pub hot_hits: u64,
    pub cold_hits: u64,
    pub promotions: u64,
    pub demotions: u64,
    /// Keys currently in the hot tier.
    pub hot_keys: usize,
    /// SSTables in the cold tier.
    pub cold_sstables: usize,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    hot_hits: AtomicU64,
    cold_hits: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
}

/// Hot/cold tiered backend.
///
/// Writes, migrations and range scans hold the tier lock. Point reads take
/// it only after both tiers miss, since a promotion can move a key from
/// cold to hot between the two lock-free lookups.
pub struct HybridStorage {
    hot: BTreeBackend,
    cold: LsmTree,
    tracker: Mutex<AccessTracker>,
    tier_lock: Mutex<()>,
    hot_threshold: u64,
    cold_age: Duration,
    counters: Counters,
}

impl HybridStorage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            hot: BTreeBackend::new(config.btree_order)?,
            cold: LsmTree::new(config)?,
            tracker: Mutex::new(AccessTracker::new()),
            tier_lock: Mutex::new(()),
            hot_threshold: config.hot_threshold,
            cold_age: config.cold_age_threshold,
            counters: Counters::default(),
        })
    }

    /// Whether `key` currently lives in the hot tier.
    pub fn is_hot(&self, key: &[u8]) -> bool {
        self.hot.with_tree(|tree| tree.contains_key(key))
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn cold(&self) -> &LsmTree {
        &self.cold
    }

    // ========================================================================
    // Migration
    // ========================================================================

    /// Move `key` from cold to hot if it is still cold.
    fn promote(&self, key: &[u8]) -> Result<()> {
        let _tiers = self.tier_lock.lock();
        if self.is_hot(key) {
            return Ok(());
        }
        // Re-read under the lock: a writer may have changed or deleted it
        let Some(value) = self.cold.get(key)? else {
            return Ok(());
        };
        self.hot.put(key, &value)?;
        self.cold.delete(key)?;
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        debug!(key = %hex::encode(key), "promoted to hot tier");
        Ok(())
    }

    /// Demote every hot key not read within the configured cold age.
    pub fn rebalance_default(&self) -> Result<usize> {
        self.rebalance(self.cold_age)
    }

    /// Demote every hot key not read within `age`. Returns how many moved.
    ///
    /// A demoted key's access count starts over.
    pub fn rebalance(&self, age: Duration) -> Result<usize> {
        let _tiers = self.tier_lock.lock();
        let now = Instant::now();

        let idle: Vec<(Vec<u8>, Vec<u8>)> = {
            let tracker = self.tracker.lock();
            self.hot
                .with_tree(|tree| tree.entries())
                .into_iter()
                .filter(|(key, _)| tracker.is_idle(key, age, now))
                .collect()
        };

        for (key, value) in &idle {
            self.cold.put(key, value)?;
            self.hot.delete(key)?;
            self.tracker.lock().reset(key);
        }

        let moved = idle.len();
        self.counters.demotions.fetch_add(moved as u64, Ordering::Relaxed);
        if moved > 0 {
            info!(demoted = moved, hot_keys = self.hot.len(), "hybrid rebalance");
        }
        Ok(moved)
    }

    /// Compact the cold tier.
    pub fn compact(&self) {
        self.cold.compact();
    }

    pub fn stats(&self) -> HybridStats {
        HybridStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            hot_hits: self.counters.hot_hits.load(Ordering::Relaxed),
            cold_hits: self.counters.cold_hits.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
            hot_keys: self.hot.len(),
            cold_sstables: self.cold.sstable_count(),
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<(Option<Vec<u8>>, bool)> {
        if let Some(value) = self.hot.get(key)? {
            return Ok((Some(value), true));
        }
        Ok((self.cold.get(key)?, false))
    }
}

impl fmt::Debug for HybridStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridStorage")
            .field("hot", &self.hot)
            .field("cold", &self.cold)
            .field("hot_threshold", &self.hot_threshold)
            .field("cold_age", &self.cold_age)
            .finish()
    }
}

impl StorageBackend for HybridStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let count = self.tracker.lock().record(key, Instant::now());

        let (mut value, mut from_hot) = self.lookup(key)?;
        if value.is_none() {
            // Both tiers missed; retry where no migration can be in flight
            let _tiers = self.tier_lock.lock();
            (value, from_hot) = self.lookup(key)?;
        }

        match (&value, from_hot) {
            (Some(_), true) => {
                self.counters.hot_hits.fetch_add(1, Ordering::Relaxed);
            }
            (Some(_), false) => {
                self.counters.cold_hits.fetch_add(1, Ordering::Relaxed);
                if count >= self.hot_threshold {
                    self.promote(key)?;
                }
            }
            (None, _) => {}
        }
        Ok(value)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let _tiers = self.tier_lock.lock();
        if self.is_hot(key) {
            self.hot.put(key, value)
        } else {
            self.cold.put(key, value)
        }
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let _tiers = self.tier_lock.lock();
        self.hot.delete(key)?;
        self.cold.delete(key)?;
        self.tracker.lock().reset(key);
        Ok(())
    }

    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (hot, cold) = {
            let _tiers = self.tier_lock.lock();
            (self.hot.range_scan(lo, hi)?, self.cold.range_scan(lo, hi)?)
        };
        Ok(merge_tiers(hot, cold))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (hot, cold) = {
            let _tiers = self.tier_lock.lock();
            (self.hot.scan_prefix(prefix)?, self.cold.scan_prefix(prefix)?)
        };
        Ok(merge_tiers(hot, cold))
    }
}

/// Merge two sorted scans; on a shared key the hot copy wins.
fn merge_tiers(hot: Vec<(Vec<u8>, Vec<u8>)>, cold: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut merged = Vec::with_capacity(hot.len() + cold.len());
    let mut hot = hot.into_iter().peekable();
    let mut cold = cold.into_iter().peekable();
    loop {
        let order = match (hot.peek(), cold.peek()) {
            (None, None) => break,
            (Some(_), None) => CmpOrdering::Less,
            (None, Some(_)) => CmpOrdering::Greater,
            (Some((h, _)), Some((c, _))) => h.cmp(c),
        };
        match order {
            CmpOrdering::Less => merged.extend(hot.next()),
            CmpOrdering::Greater => merged.extend(cold.next()),
            CmpOrdering::Equal => {
                cold.next();
                merged.extend(hot.next());
            }
        }
    }
    merged
}
