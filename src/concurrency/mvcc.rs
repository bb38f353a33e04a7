//! Multi-version storage of uncommitted and committed values.

use std::collections::HashMap;

use super::transaction::{IsolationLevel, Transaction};
use crate::common::{Timestamp, TxnId};

/// One value of a key. `value == None` is a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub txn_id: TxnId,
    pub value: Option<Vec<u8>>,
    /// Write time while uncommitted, commit time afterwards.
    pub timestamp: Timestamp,
    pub committed: bool,
}

impl Version {
    /// Committed state of a key before any transaction touched it.
    pub fn base(value: Option<Vec<u8>>) -> Self {
        Self {
            txn_id: TxnId::SYSTEM,
            value,
            timestamp: Timestamp::ZERO,
            committed: true,
        }
    }

    /// Whether `reader` may see this version.
    ///
    /// | Level            | Visible                                       |
    /// |------------------|-----------------------------------------------|
    /// | READ_UNCOMMITTED | everything                                    |
    /// | READ_COMMITTED   | committed versions                            |
    /// | REPEATABLE_READ  | committed at or before the reader's start     |
    /// | SERIALIZABLE     | as REPEATABLE_READ                            |
    ///
    /// A transaction always sees its own writes.
    pub fn is_visible_to(&self, reader: &Transaction) -> bool {
        if self.txn_id == reader.txn_id {
            return true;
        }
        match reader.isolation_level {
            IsolationLevel::ReadUncommitted => true,
            IsolationLevel::ReadCommitted => self.committed,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                self.committed && self.timestamp <= reader.start_time
            }
        }
    }
}

/// Per-key version chains, oldest first.
#[derive(Debug, Default)]
pub struct VersionStore {
    chains: HashMap<Vec<u8>, Vec<Version>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_chain(&self, key: &[u8]) -> bool {
        self.chains.contains_key(key)
    }

    /// Start a chain for `key` from its committed base value. No-op if one
    /// already exists.
    pub fn seed(&mut self, key: &[u8], base: Option<Vec<u8>>) {
        self.chains
            .entry(key.to_vec())
            .or_insert_with(|| vec![Version::base(base)]);
    }

    /// Newest version of `key` visible to `reader`.
    ///
    /// `None` means the key has no chain; `Some(None)` means the visible
    /// version is a deletion.
    pub fn visible(&self, key: &[u8], reader: &Transaction) -> Option<Option<&[u8]>> {
        let chain = self.chains.get(key)?;
        chain
            .iter()
            .rev()
            .find(|v| v.is_visible_to(reader))
            .map(|v| v.value.as_deref())
    }

    /// Value a new write by `txn_id` replaces: its own latest version, else
    /// the latest committed one.
    pub fn current(&self, key: &[u8], txn_id: TxnId) -> Option<Option<&[u8]>> {
        let chain = self.chains.get(key)?;
        chain
            .iter()
            .rev()
            .find(|v| v.txn_id == txn_id || v.committed)
            .map(|v| v.value.as_deref())
    }

    /// Record an uncommitted write. A second write by the same transaction
    /// replaces its first.
    pub fn write(&mut self, key: &[u8], txn_id: TxnId, value: Option<Vec<u8>>, now: Timestamp) {
        let chain = self.chains.entry(key.to_vec()).or_default();
        match chain.last_mut() {
            Some(last) if last.txn_id == txn_id && !last.committed => {
                last.value = value;
                last.timestamp = now;
            }
            _ => chain.push(Version {
                txn_id,
                value,
                timestamp: now,
                committed: false,
            }),
        }
    }

    /// Mark `txn_id`'s version of `key` committed at `commit_ts` and return
    /// its value.
    pub fn commit(&mut self, key: &[u8], txn_id: TxnId, commit_ts: Timestamp) -> Option<Option<Vec<u8>>> {
        let chain = self.chains.get_mut(key)?;
        let version = chain.iter_mut().rev().find(|v| v.txn_id == txn_id && !v.committed)?;
        version.committed = true;
        version.timestamp = commit_ts;
        Some(version.value.clone())
    }

    /// Remove `txn_id`'s uncommitted versions of `key`.
    pub fn strip(&mut self, key: &[u8], txn_id: TxnId) {
        if let Some(chain) = self.chains.get_mut(key) {
            chain.retain(|v| v.committed || v.txn_id != txn_id);
        }
    }

    /// Whether a transaction other than `txn_id` committed `key` after `since`.
    pub fn committed_after(&self, key: &[u8], txn_id: TxnId, since: Timestamp) -> bool {
        self.chains.get(key).is_some_and(|chain| {
            chain
                .iter()
                .any(|v| v.committed && v.txn_id != txn_id && v.timestamp > since)
        })
    }

    pub fn chain(&self, key: &[u8]) -> Option<&[Version]> {
        self.chains.get(key).map(Vec::as_slice)
    }

    /// Keys with a chain.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(id: u64, level: IsolationLevel, start: u64) -> Transaction {
        Transaction::new(TxnId(id), level, Timestamp(start))
    }

    #[test]
    fn test_visibility_by_level() {
        let mut store = VersionStore::new();
        store.seed(b"k", Some(b"base".to_vec()));
        store.write(b"k", TxnId(1), Some(b"v1".to_vec()), Timestamp(2));
        store.commit(b"k", TxnId(1), Timestamp(3));
        store.write(b"k", TxnId(2), Some(b"dirty".to_vec()), Timestamp(5));

        let ru = txn(9, IsolationLevel::ReadUncommitted, 4);
        let rc = txn(9, IsolationLevel::ReadCommitted, 1);
        let rr_old = txn(9, IsolationLevel::RepeatableRead, 1);
        let rr_new = txn(9, IsolationLevel::RepeatableRead, 4);

        assert_eq!(store.visible(b"k", &ru), Some(Some(&b"dirty"[..])));
        assert_eq!(store.visible(b"k", &rc), Some(Some(&b"v1"[..])));
        assert_eq!(store.visible(b"k", &rr_old), Some(Some(&b"base"[..])));
        assert_eq!(store.visible(b"k", &rr_new), Some(Some(&b"v1"[..])));
        assert_eq!(store.visible(b"other", &rc), None);
    }

    #[test]
    fn test_own_writes_visible() {
        let mut store = VersionStore::new();
        store.seed(b"k", None);
        store.write(b"k", TxnId(1), Some(b"mine".to_vec()), Timestamp(3));
        store.write(b"k", TxnId(1), Some(b"mine2".to_vec()), Timestamp(4));

        let me = txn(1, IsolationLevel::Serializable, 2);
        assert_eq!(store.visible(b"k", &me), Some(Some(&b"mine2"[..])));
        assert_eq!(store.chain(b"k").unwrap().len(), 2);
        assert_eq!(store.current(b"k", TxnId(2)), Some(None));
    }

    #[test]
    fn test_strip_and_committed_after() {
        let mut store = VersionStore::new();
        store.seed(b"k", None);
        store.write(b"k", TxnId(1), Some(b"a".to_vec()), Timestamp(2));
        store.strip(b"k", TxnId(1));
        assert_eq!(store.chain(b"k").unwrap().len(), 1);

        store.write(b"k", TxnId(2), None, Timestamp(3));
        assert_eq!(store.commit(b"k", TxnId(2), Timestamp(6)), Some(None));
        assert!(store.committed_after(b"k", TxnId(3), Timestamp(5)));
        assert!(!store.committed_after(b"k", TxnId(3), Timestamp(6)));
        assert!(!store.committed_after(b"k", TxnId(2), Timestamp(0)));
    }
}
