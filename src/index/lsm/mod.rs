//! Log-structured merge tree.
//!
//! ```text
//!   put/delete ──► MemTable (sorted, mutable)
//!                     │ full: seal
//!                     ▼
//!   SSTables   [ t0 | t1 | t2 ]   oldest ... newest, each with a bloom filter
//!                     │ compact(): k-way merge, newest wins, tombstones dropped
//!                     ▼
//!              [ merged ]
//! ```
//!
//! Reads check the memtable, then the SSTables from newest to oldest. A
//! table whose filter rejects the key is skipped without a search.

mod bloom;
mod memtable;
mod merge;
mod sstable;

pub use bloom::BloomFilter;
pub use memtable::{Entry, MemTable};
pub use merge::merge_runs;
pub use sstable::SsTable;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::common::config::StorageConfig;
use crate::common::Result;
use crate::index::{prefix_upper_bound, StorageBackend};

type TableList = Arc<Vec<Arc<SsTable>>>;

/// Point-in-time LSM counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsmStats {
    /// Puts and deletes.
    pub writes: u64,
    /// Point lookups.
    pub reads: u64,
    /// Memtables sealed into SSTables.
    pub flushes: u64,
    /// Completed compactions.
    pub compactions: u64,
    /// SSTable searches avoided by a negative bloom filter.
    pub bloom_skips: u64,
    /// Current number of SSTables.
    pub sstables: usize,
    /// Entries in the active memtable.
    pub memtable_entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    flushes: AtomicU64,
    compactions: AtomicU64,
    bloom_skips: AtomicU64,
}

/// An LSM tree over a memtable and a list of immutable SSTables.
///
/// # Concurrency
/// - the memtable sits behind a `RwLock`; sealing happens while its write
///   lock is held, so a key is always in the memtable or in a published table
/// - the table list is an `Arc` snapshot swapped under its own `RwLock`
/// - compactions are serialized by a mutex and merge outside every lock;
///   tables sealed during a merge are kept after the merged one
///
/// Lock order: memtable, then table list.
pub struct LsmTree {
    memtable: RwLock<MemTable>,
    sstables: RwLock<TableList>,
    compaction: Mutex<()>,
    next_table_id: AtomicU64,
    memtable_size: usize,
    fp_rate: f64,
    counters: Counters,
}

impl LsmTree {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            memtable: RwLock::new(MemTable::new(config.memtable_size)),
            sstables: RwLock::new(Arc::new(Vec::new())),
            compaction: Mutex::new(()),
            next_table_id: AtomicU64::new(0),
            memtable_size: config.memtable_size,
            fp_rate: config.bloom_fp_rate,
            counters: Counters::default(),
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn write(&self, key: &[u8], value: Option<&[u8]>) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let mut memtable = self.memtable.write();
        match value {
            Some(value) => memtable.put(key, value),
            None => memtable.delete(key),
        }
        if memtable.is_full() {
            self.seal(&mut memtable);
        }
    }

    /// Turn the memtable contents into a new newest SSTable.
    ///
    /// Caller holds the memtable write lock.
    fn seal(&self, memtable: &mut MemTable) {
        let entries = memtable.take_sorted();
        let id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        let table = Arc::new(SsTable::new(id, entries, self.fp_rate));
        debug!(table_id = id, entries = table.len(), "memtable sealed");

        let mut sstables = self.sstables.write();
        let mut next: Vec<Arc<SsTable>> = sstables.as_ref().clone();
        next.push(table);
        *sstables = Arc::new(next);
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Seal the memtable now if it holds anything.
    pub fn flush(&self) {
        let mut memtable = self.memtable.write();
        if !memtable.is_empty() {
            self.seal(&mut memtable);
        }
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Merge every SSTable into one.
    ///
    /// The newest entry of each key wins and tombstones are dropped, since no
    /// older table survives the merge. A no-op without SSTables.
    pub fn compact(&self) {
        let _serial = self.compaction.lock();
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return;
        }

        let runs: Vec<&[(Vec<u8>, Entry)]> = snapshot.iter().map(|t| t.entries()).collect();
        let merged = merge_runs(&runs, true);
        let id = self.next_table_id.fetch_add(1, Ordering::Relaxed);
        let merged = Arc::new(SsTable::new(id, merged, self.fp_rate));

        let mut sstables = self.sstables.write();
        // Only seals append while we merge; they stay newer than the result
        let mut next = Vec::with_capacity(1 + sstables.len() - snapshot.len());
        next.push(Arc::clone(&merged));
        next.extend(sstables[snapshot.len()..].iter().cloned());
        *sstables = Arc::new(next);
        drop(sstables);

        self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        info!(
            merged_tables = snapshot.len(),
            entries = merged.len(),
            "lsm compaction finished"
        );
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    fn snapshot(&self) -> TableList {
        Arc::clone(&self.sstables.read())
    }

    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    pub fn memtable_len(&self) -> usize {
        self.memtable.read().len()
    }

    /// Memtable entries that trigger a seal.
    pub fn memtable_size(&self) -> usize {
        self.memtable_size
    }

    pub fn stats(&self) -> LsmStats {
        LsmStats {
            writes: self.counters.writes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
            bloom_skips: self.counters.bloom_skips.load(Ordering::Relaxed),
            sstables: self.sstable_count(),
            memtable_entries: self.memtable_len(),
        }
    }
}

impl fmt::Debug for LsmTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsmTree")
            .field("memtable_entries", &self.memtable_len())
            .field("sstables", &self.sstable_count())
            .field("memtable_size", &self.memtable_size)
            .field("fp_rate", &self.fp_rate)
            .finish()
    }
}

impl StorageBackend for LsmTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);

        let tables = {
            let memtable = self.memtable.read();
            if let Some(entry) = memtable.get(key) {
                return Ok(entry.value().map(<[u8]>::to_vec));
            }
            // Taken under the memtable lock so a concurrent seal is visible
            self.snapshot()
        };

        for table in tables.iter().rev() {
            if !table.might_contain(key) {
                self.counters.bloom_skips.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if let Some(entry) = table.get(key) {
                return Ok(entry.value().map(<[u8]>::to_vec));
            }
        }
        Ok(None)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(key, None);
        Ok(())
    }

    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan(lo, Some(hi)))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let upper = prefix_upper_bound(prefix);
        let mut found = self.scan(prefix, upper.as_deref());
        found.retain(|(k, _)| k.starts_with(prefix));
        Ok(found)
    }
}

impl LsmTree {
    /// Live pairs with `lo <= key`, bounded by `hi` when given.
    fn scan(&self, lo: &[u8], hi: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let (tables, recent) = {
            let memtable = self.memtable.read();
            let recent: Vec<(Vec<u8>, Entry)> = memtable
                .range(lo, hi)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect();
            (self.snapshot(), recent)
        };

        let mut runs: Vec<&[(Vec<u8>, Entry)]> = tables.iter().map(|t| t.range(lo, hi)).collect();
        runs.push(&recent);

        merge_runs(&runs, true)
            .into_iter()
            .filter_map(|(k, e)| match e {
                Entry::Value(v) => Some((k, v)),
                Entry::Tombstone => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::BackendKind;

    fn lsm(memtable_size: usize) -> LsmTree {
        LsmTree::new(&StorageConfig::new(BackendKind::Lsm).memtable_size(memtable_size)).unwrap()
    }

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    #[test]
    fn test_seal_count_is_ceil_n_over_s() {
        for (n, s) in [(10u32, 3usize), (9, 3), (1, 5), (100, 7)] {
            let tree = lsm(s);
            for i in 0..n {
                tree.put(&key(i), b"v").unwrap();
            }
            tree.flush();

            let expected = (n as usize).div_ceil(s);
            assert_eq!(tree.sstable_count(), expected, "n={} s={}", n, s);
            assert_eq!(tree.memtable_len(), 0);
        }
    }

    #[test]
    fn test_flush_empty_memtable_is_noop() {
        let tree = lsm(4);
        tree.flush();
        assert_eq!(tree.sstable_count(), 0);
        assert_eq!(tree.stats().flushes, 0);
    }

    #[test]
    fn test_reads_see_newest_version_across_tables() {
        let tree = lsm(2);
        tree.put(b"a", b"1").unwrap();
        tree.put(b"b", b"1").unwrap(); // seal
        tree.put(b"a", b"2").unwrap();
        tree.delete(b"b").unwrap(); // seal

        assert_eq!(tree.sstable_count(), 2);
        assert_eq!(tree.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(tree.get(b"b").unwrap(), None);
        assert_eq!(tree.get(b"zz").unwrap(), None);
    }

    #[test]
    fn test_compaction_keeps_last_written_values() {
        let tree = lsm(3);
        for round in 0..4u8 {
            for i in 0..10u32 {
                tree.put(&key(i), &[round]).unwrap();
            }
        }
        tree.delete(&key(3)).unwrap();
        tree.flush();
        assert!(tree.sstable_count() > 1);

        tree.compact();
        assert_eq!(tree.sstable_count(), 1);
        assert_eq!(tree.stats().compactions, 1);

        for i in 0..10u32 {
            let expected = if i == 3 { None } else { Some(vec![3u8]) };
            assert_eq!(tree.get(&key(i)).unwrap(), expected);
        }
        // Tombstone for key 3 was dropped, not carried
        let merged = tree.snapshot();
        assert_eq!(merged[0].len(), 9);
    }

    #[test]
    fn test_compact_without_tables_is_noop() {
        let tree = lsm(10);
        tree.put(b"k", b"v").unwrap();
        tree.compact();
        assert_eq!(tree.sstable_count(), 0);
        assert_eq!(tree.stats().compactions, 0);
        assert_eq!(tree.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_bloom_filter_skips_tables() {
        let tree = lsm(4);
        for i in 0..40u32 {
            tree.put(&key(i), b"v").unwrap();
        }
        assert_eq!(tree.sstable_count(), 10);

        tree.get(b"absent").unwrap();
        let stats = tree.stats();
        assert_eq!(stats.reads, 1);
        assert!(stats.bloom_skips >= 8, "only {} skips", stats.bloom_skips);
    }

    #[test]
    fn test_range_scan_merges_memtable_and_tables() {
        let tree = lsm(3);
        for i in 0..10u32 {
            tree.put(&key(i), &[i as u8]).unwrap();
        }
        tree.put(&key(4), b"new").unwrap();
        tree.delete(&key(5)).unwrap();

        let scanned = tree.range_scan(&key(3), &key(6)).unwrap();
        assert_eq!(
            scanned,
            vec![
                (key(3), vec![3]),
                (key(4), b"new".to_vec()),
                (key(6), vec![6]),
            ]
        );
        assert!(tree.range_scan(&key(6), &key(3)).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_compaction() {
        use std::thread;

        let tree = Arc::new(lsm(16));
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        tree.put(&key(t * 1000 + i), &t.to_be_bytes()).unwrap();
                    }
                })
            })
            .collect();
        let compactor = {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for _ in 0..20 {
                    tree.compact();
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        compactor.join().unwrap();

        for t in 0..4u32 {
            for i in 0..200u32 {
                assert_eq!(tree.get(&key(t * 1000 + i)).unwrap(), Some(t.to_be_bytes().to_vec()));
            }
        }
    }
}
