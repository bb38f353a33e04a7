//! In-memory write buffer of the LSM tree.

use std::collections::BTreeMap;
use std::ops::Bound;

/// A value or a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Value(Vec<u8>),
    Tombstone,
}

impl Entry {
    /// The live value, `None` for a tombstone.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Entry::Tombstone)
    }
}

/// Sorted, mutable map from key to [`Entry`], sealed once it holds
/// `max_size` entries.
#[derive(Debug)]
pub struct MemTable {
    entries: BTreeMap<Vec<u8>, Entry>,
    max_size: usize,
}

impl MemTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_size,
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.entries.insert(key.to_vec(), Entry::Value(value.to_vec()));
    }

    /// Record a deletion. The tombstone shadows older SSTable entries.
    pub fn delete(&mut self, key: &[u8]) {
        self.entries.insert(key.to_vec(), Entry::Tombstone);
    }

    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Entries with `lo <= key <= hi`, tombstones included. `hi` of
    /// `None` runs to the last key.
    pub fn range<'a>(&'a self, lo: &[u8], hi: Option<&[u8]>) -> impl Iterator<Item = (&'a Vec<u8>, &'a Entry)> + 'a {
        let upper = match hi {
            Some(hi) => Bound::Included(hi.to_vec()),
            None => Bound::Unbounded,
        };
        // BTreeMap::range panics on an inverted range
        let valid = hi.map_or(true, |hi| lo <= hi);
        valid
            .then(|| self.entries.range((Bound::Included(lo.to_vec()), upper)))
            .into_iter()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Drain into a sorted run, leaving the table empty.
    pub fn take_sorted(&mut self) -> Vec<(Vec<u8>, Entry)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }
}
