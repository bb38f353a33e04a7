//! K-way merge of sorted runs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::memtable::Entry;

/// Head of one run inside the merge heap.
struct HeapEntry<'a> {
    key: &'a [u8],
    /// Index of the run; a larger index is a newer run.
    source: usize,
    pos: usize,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    /// Smallest key first; on equal keys the newest run first.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(other.key) {
            Ordering::Equal => self.source.cmp(&other.source),
            other => other.reverse(),
        }
    }
}

/// Merge sorted `runs` (oldest first) into one sorted run.
///
/// For a key present in several runs the newest entry wins. With
/// `drop_tombstones` the winning tombstones are discarded, which is only
/// correct when no older data outside `runs` remains.
pub fn merge_runs(runs: &[&[(Vec<u8>, Entry)]], drop_tombstones: bool) -> Vec<(Vec<u8>, Entry)> {
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (source, run) in runs.iter().enumerate() {
        if let Some((key, _)) = run.first() {
            heap.push(HeapEntry { key, source, pos: 0 });
        }
    }

    let mut merged: Vec<(Vec<u8>, Entry)> = Vec::new();
    let mut last_key: Option<&[u8]> = None;

    while let Some(HeapEntry { key, source, pos }) = heap.pop() {
        let run = runs[source];
        if let Some((next_key, _)) = run.get(pos + 1) {
            heap.push(HeapEntry {
                key: next_key,
                source,
                pos: pos + 1,
            });
        }

        // Older duplicates of a key already emitted (or dropped)
        if last_key == Some(key) {
            continue;
        }
        last_key = Some(key);

        let entry = &run[pos].1;
        if drop_tombstones && entry.is_tombstone() {
            continue;
        }
        merged.push((key.to_vec(), entry.clone()));
    }
    merged
}
