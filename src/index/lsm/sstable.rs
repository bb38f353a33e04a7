//! Immutable sorted runs.

use super::bloom::BloomFilter;
use super::memtable::Entry;

/// A sealed, sorted run of entries plus a bloom filter over its keys.
///
/// Tombstones are kept so that they keep shadowing older tables until a
/// full compaction drops them.
#[derive(Debug)]
pub struct SsTable {
    id: u64,
    entries: Vec<(Vec<u8>, Entry)>,
    filter: BloomFilter,
}

impl SsTable {
    /// Build a table from entries already sorted by key without duplicates.
    pub fn new(id: u64, entries: Vec<(Vec<u8>, Entry)>, fp_rate: f64) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        let filter = BloomFilter::from_keys(entries.iter().map(|(k, _)| k.as_slice()), fp_rate);
        Self { id, entries, filter }
    }

    /// Monotonic id; larger is newer.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bloom filter check. `false` means the key is not in this table.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.filter.might_contain(key)
    }

    /// Binary search for `key`, without consulting the filter.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Entries with `lo <= key <= hi`.
    pub fn range(&self, lo: &[u8], hi: Option<&[u8]>) -> &[(Vec<u8>, Entry)] {
        let start = self.entries.partition_point(|(k, _)| k.as_slice() < lo);
        let end = match hi {
            Some(hi) if lo > hi => return &[],
            Some(hi) => self.entries.partition_point(|(k, _)| k.as_slice() <= hi),
            None => self.entries.len(),
        };
        &self.entries[start..end]
    }

    pub fn entries(&self) -> &[(Vec<u8>, Entry)] {
        &self.entries
    }
}
