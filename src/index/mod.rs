//! Key-value storage backends.
//!
//! Every backend implements [`StorageBackend`]. The concrete variant is
//! chosen once, from [`StorageConfig`], through the closed [`Backend`] enum:
//!
//! ```text
//!            StorageBackend
//!     ┌────────────┼─────────────┬──────────────┐
//!  BTreeBackend  LsmTree   HybridStorage     PagedBTree
//!                          (hot BTree +      (BTree checkpointed
//!                           cold LSM)         into a page store)
//! ```
//!
//! Only [`PagedBTree`] is durable; the others lose their contents with the
//! process and are rebuilt from the write-ahead log on restart.

pub mod btree;
pub mod hybrid;
pub mod lsm;

pub use btree::{BTreeBackend, PagedBTree};
pub use hybrid::HybridStorage;
pub use lsm::LsmTree;

use tracing::info;

use crate::common::config::{BackendKind, StorageConfig};
use crate::common::Result;

/// A sorted byte-key to byte-value store.
///
/// All methods take `&self`; implementations synchronize internally and may
/// be shared between threads. A missing key is `Ok(None)`, never an error.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key. Removing a missing key succeeds.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every pair with `lo <= key <= hi`, ascending by key.
    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Every pair whose key starts with `prefix`, ascending by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Whether a successful [`sync`](Self::sync) makes every applied write
    /// survive a restart.
    fn is_durable(&self) -> bool {
        false
    }

    /// Persist every applied write.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Inclusive upper bound for a scan over `prefix`.
///
/// The bound is the prefix with its last non-`0xFF` byte incremented and
/// the rest dropped, so it can itself fall outside the prefix; callers
/// filter with `starts_with`. `None` when no such key exists and the scan
/// must run to the end.
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

/// The configured storage backend.
#[derive(Debug)]
pub enum Backend {
    BTree(BTreeBackend),
    Lsm(LsmTree),
    Hybrid(HybridStorage),
}

impl Backend {
    /// Build the backend named by `config.backend`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let backend = match config.backend {
            BackendKind::BTree => Backend::BTree(BTreeBackend::new(config.btree_order)?),
            BackendKind::Lsm => Backend::Lsm(LsmTree::new(config)?),
            BackendKind::Hybrid => Backend::Hybrid(HybridStorage::new(config)?),
        };
        info!(kind = ?config.backend, "storage backend created");
        Ok(backend)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::BTree(_) => BackendKind::BTree,
            Backend::Lsm(_) => BackendKind::Lsm,
            Backend::Hybrid(_) => BackendKind::Hybrid,
        }
    }

    fn inner(&self) -> &dyn StorageBackend {
        match self {
            Backend::BTree(b) => b,
            Backend::Lsm(b) => b,
            Backend::Hybrid(b) => b,
        }
    }
}

impl StorageBackend for Backend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner().get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner().put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner().delete(key)
    }

    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner().range_scan(lo, hi)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner().scan_prefix(prefix)
    }

    fn is_durable(&self) -> bool {
        self.inner().is_durable()
    }

    fn sync(&self) -> Result<()> {
        self.inner().sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(backend: &dyn StorageBackend) {
        for i in 0..50u8 {
            backend.put(&[i], &[i, i]).unwrap();
        }
        backend.put(&[7], b"seven").unwrap();
        backend.delete(&[8]).unwrap();
        backend.delete(&[200]).unwrap();

        assert_eq!(backend.get(&[7]).unwrap(), Some(b"seven".to_vec()));
        assert_eq!(backend.get(&[8]).unwrap(), None);
        assert_eq!(backend.get(&[9]).unwrap(), Some(vec![9, 9]));

        let keys: Vec<u8> = backend
            .range_scan(&[5], &[10])
            .unwrap()
            .into_iter()
            .map(|(k, _)| k[0])
            .collect();
        assert_eq!(keys, vec![5, 6, 7, 9, 10]);

        backend.put(&[0xFF], b"max").unwrap();
        backend.put(&[0xFF, 0x00], b"max-0").unwrap();
        backend.put(&[0xFF, 0xFF, 0x01], b"max-max-1").unwrap();
        let tail: Vec<Vec<u8>> = backend
            .scan_prefix(&[0xFF])
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(tail, vec![vec![0xFF], vec![0xFF, 0x00], vec![0xFF, 0xFF, 0x01]]);
        assert_eq!(backend.scan_prefix(&[7]).unwrap(), vec![(vec![7], b"seven".to_vec())]);
        assert!(backend.scan_prefix(&[8]).unwrap().is_empty());
        assert_eq!(backend.scan_prefix(&[]).unwrap().len(), 52);
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_upper_bound(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_upper_bound(&[]), None);
    }

    #[test]
    fn test_every_backend_kind_behaves_alike() {
        for kind in [BackendKind::BTree, BackendKind::Lsm, BackendKind::Hybrid] {
            let config = StorageConfig::new(kind).memtable_size(8).hot_threshold(2);
            let backend = Backend::from_config(&config).unwrap();
            assert_eq!(backend.kind(), kind);
            assert!(!backend.is_durable());
            exercise(&backend);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StorageConfig::new(BackendKind::BTree).btree_order(2);
        assert!(Backend::from_config(&config).is_err());
    }
}
