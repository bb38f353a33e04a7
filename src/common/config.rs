//! Configuration for tierdb components.
//!
//! Each component takes a small config struct with sane defaults and
//! builder-style setters. `validate()` is called by constructors; a bad value
//! surfaces as [`Error::InvalidConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};
use crate::concurrency::IsolationLevel;

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems, so a page maps onto one
/// aligned block of the underlying store.
pub const PAGE_SIZE: usize = 4096;

/// Smallest page that still fits a header plus a one-key node.
pub const MIN_PAGE_SIZE: usize = 256;

/// Default B-tree order (maximum children per node).
///
/// Small enough that tests exercise splits and merges; production stores
/// use 100-1000.
pub const DEFAULT_BTREE_ORDER: usize = 5;

/// Default number of entries a memtable holds before it is sealed.
pub const DEFAULT_MEMTABLE_SIZE: usize = 1000;

/// Default number of reads after which a cold key is promoted.
pub const DEFAULT_HOT_THRESHOLD: u64 = 3;

/// Default idle time after which a hot key is demoted.
pub const DEFAULT_COLD_AGE: Duration = Duration::from_secs(60);

/// Default bloom filter false-positive target.
pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;

/// Default number of buffered log entries before an automatic flush.
pub const DEFAULT_WAL_BUFFER_ENTRIES: usize = 100;

/// Default bound on how long a transaction waits for a lock.
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Which storage backend variant to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Balanced B-tree: fast point reads and range scans.
    BTree,
    /// Log-structured merge tree: fast writes.
    #[default]
    Lsm,
    /// Hot B-tree tier over a cold LSM tier.
    Hybrid,
}

/// Storage backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend variant.
    pub backend: BackendKind,
    /// Page size in bytes for page-oriented structures.
    pub page_size: usize,
    /// B-tree order M (max children per node, must be >= 3).
    pub btree_order: usize,
    /// Memtable entries before sealing into an SSTable.
    pub memtable_size: usize,
    /// Reads after which a cold key is promoted to the hot tier.
    pub hot_threshold: u64,
    /// Idle time after which a hot key is demoted by `rebalance`.
    pub cold_age_threshold: Duration,
    /// Bloom filter false-positive target, in (0, 1).
    pub bloom_fp_rate: f64,
}

impl StorageConfig {
    /// Default configuration for a backend variant.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Sets the B-tree order.
    pub fn btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    /// Sets the memtable size threshold.
    pub fn memtable_size(mut self, entries: usize) -> Self {
        self.memtable_size = entries;
        self
    }

    /// Sets the promotion threshold.
    pub fn hot_threshold(mut self, reads: u64) -> Self {
        self.hot_threshold = reads;
        self
    }

    /// Sets the demotion age.
    pub fn cold_age_threshold(mut self, age: Duration) -> Self {
        self.cold_age_threshold = age;
        self
    }

    /// Sets the page size.
    pub fn page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Sets the bloom filter false-positive target.
    pub fn bloom_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_fp_rate = rate;
        self
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;
        if self.btree_order < 3 {
            return Err(Error::InvalidConfig(format!(
                "btree_order must be >= 3, got {}",
                self.btree_order
            )));
        }
        if self.memtable_size == 0 {
            return Err(Error::InvalidConfig("memtable_size must be > 0".into()));
        }
        if self.hot_threshold == 0 {
            return Err(Error::InvalidConfig("hot_threshold must be > 0".into()));
        }
        if !(self.bloom_fp_rate > 0.0 && self.bloom_fp_rate < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "bloom_fp_rate must be in (0, 1), got {}",
                self.bloom_fp_rate
            )));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            page_size: PAGE_SIZE,
            btree_order: DEFAULT_BTREE_ORDER,
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            hot_threshold: DEFAULT_HOT_THRESHOLD,
            cold_age_threshold: DEFAULT_COLD_AGE,
            bloom_fp_rate: DEFAULT_BLOOM_FP_RATE,
        }
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Cache size in megabytes.
    pub capacity_mb: usize,
    /// Page size in bytes. Must match the page store.
    pub page_size: usize,
}

impl BufferPoolConfig {
    /// Configuration for a pool of `capacity_mb` megabytes of `page_size` pages.
    pub fn new(capacity_mb: usize, page_size: usize) -> Self {
        Self {
            capacity_mb,
            page_size,
        }
    }

    /// Number of page frames: `capacity_mb * 1MB / page_size`.
    pub fn capacity_pages(&self) -> usize {
        self.capacity_mb * 1024 * 1024 / self.page_size.max(1)
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;
        if self.capacity_pages() == 0 {
            return Err(Error::InvalidConfig(format!(
                "buffer pool of {} MB holds no {}-byte pages",
                self.capacity_mb, self.page_size
            )));
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(64, PAGE_SIZE)
    }
}

/// Write-ahead log configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalConfig {
    /// Buffered entries that trigger an automatic flush.
    pub buffer_entries: usize,
}

impl WalConfig {
    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_entries == 0 {
            return Err(Error::InvalidConfig("buffer_entries must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            buffer_entries: DEFAULT_WAL_BUFFER_ENTRIES,
        }
    }
}

/// Transaction manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnConfig {
    /// How long a transaction may block on one lock request.
    pub lock_wait_timeout: Duration,
    /// Level used by `TransactionManager::begin_default`.
    pub default_isolation: IsolationLevel,
}

impl TxnConfig {
    /// Sets the lock wait bound.
    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Sets the default isolation level.
    pub fn default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.lock_wait_timeout.is_zero() {
            return Err(Error::InvalidConfig("lock_wait_timeout must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
            default_isolation: IsolationLevel::default(),
        }
    }
}

pub(crate) fn validate_page_size(page_size: usize) -> Result<()> {
    if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
        return Err(Error::InvalidConfig(format!(
            "page_size must be a power of two >= {}, got {}",
            MIN_PAGE_SIZE, page_size
        )));
    }
    Ok(())
}
