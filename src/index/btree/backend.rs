//! B-tree as a shared storage backend.

use parking_lot::RwLock;

use super::BTree;
use crate::common::Result;
use crate::index::{prefix_upper_bound, StorageBackend};

/// A [`BTree`] behind a reader-writer lock.
///
/// Point reads and range scans share the lock; writes take it exclusively.
#[derive(Debug)]
pub struct BTreeBackend {
    tree: RwLock<BTree>,
}

impl BTreeBackend {
    pub fn new(order: usize) -> Result<Self> {
        Ok(Self::from_tree(BTree::new(order)?))
    }

    /// Wrap an existing tree, e.g. one rebuilt by [`load_tree`](super::load_tree).
    pub fn from_tree(tree: BTree) -> Self {
        Self {
            tree: RwLock::new(tree),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    pub fn height(&self) -> usize {
        self.tree.read().height()
    }

    /// Run `f` against the tree under the read lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&BTree) -> R) -> R {
        f(&self.tree.read())
    }
}

impl StorageBackend for BTreeBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.read().get(key).map(<[u8]>::to_vec))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.write().remove(key);
        Ok(())
    }

    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.tree.read().range(lo, hi))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let upper = prefix_upper_bound(prefix);
        let mut found = self.tree.read().scan(prefix, upper.as_deref());
        found.retain(|(k, _)| k.starts_with(prefix));
        Ok(found)
    }
}
