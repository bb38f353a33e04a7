//! B-tree backend checkpointed into a page store.
//!
//! The tree itself lives in memory. `sync` writes a full copy of it to pages
//! the current checkpoint does not use, flushes them, and only then points
//! the meta page (page 0) at the new root:
//!
//! ```text
//! ┌────────────────────┬───────┬──────┬───────┬───────────┐
//! │ PageHeader (Meta)  │ magic │ root │ order │ watermark │
//! │ 13 B               │ u32   │ u32  │ u32   │ u32       │
//! └────────────────────┴───────┴──────┴───────┴───────────┘
//! ```
//!
//! A crash at any point before the meta page reaches the store leaves the
//! previous checkpoint intact. Pages of the replaced tree are recycled by
//! later syncs; on open, every page below the watermark that the current
//! tree does not reach is treated as free.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{load_tree, release_tree, save_tree, tree_pages, BTree, BTreeBackend};
use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result};
use crate::index::StorageBackend;
use crate::storage::page::{Page, PageHeader, PageType};
use crate::storage::FreeList;

const META_PAGE: u32 = 0;
const META_MAGIC: u32 = 0x5444_4254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Meta {
    root: PageId,
    order: u32,
    watermark: u32,
}

impl Meta {
    const LEN: usize = 16;

    fn encode(&self, page_size: usize) -> Page {
        let mut page = Page::new(page_size);
        page.set_header(&PageHeader::new(PageType::Meta));
        let body = &mut page.as_mut_slice()[PageHeader::SIZE..PageHeader::SIZE + Self::LEN];
        body[0..4].copy_from_slice(&META_MAGIC.to_le_bytes());
        body[4..8].copy_from_slice(&self.root.as_u32().to_le_bytes());
        body[8..12].copy_from_slice(&self.order.to_le_bytes());
        body[12..16].copy_from_slice(&self.watermark.to_le_bytes());
        page.update_checksum();
        page
    }

    /// `None` for a store that was never synced.
    fn decode(page: &Page) -> Result<Option<Self>> {
        let page_id = PageId::new(META_PAGE);
        match page.header().page_type {
            PageType::Meta => {}
            PageType::Invalid if page.as_slice().iter().all(|&b| b == 0) => return Ok(None),
            other => {
                return Err(Error::CorruptPage {
                    page_id,
                    reason: format!("expected a meta page, found {:?}", other),
                })
            }
        }
        if !page.verify_checksum() {
            return Err(Error::ChecksumMismatch(page_id));
        }

        let body = &page.as_slice()[PageHeader::SIZE..PageHeader::SIZE + Self::LEN];
        let field = |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
        if field(0) != META_MAGIC {
            return Err(Error::CorruptPage {
                page_id,
                reason: "bad meta magic".into(),
            });
        }
        Ok(Some(Self {
            root: PageId::new(field(4)),
            order: field(8),
            watermark: field(12),
        }))
    }
}

/// Page allocation and the root of the last completed sync.
#[derive(Debug)]
struct Checkpoint {
    free_list: FreeList,
    root: Option<PageId>,
}

/// A [`BTreeBackend`] whose contents survive restarts.
///
/// Reads and writes never touch the page store. [`sync`] persists the
/// current contents; anything written after the last successful sync is
/// gone after a restart unless the write-ahead log replays it.
///
/// # Example
/// ```
/// use tierdb::buffer::BufferPoolManager;
/// use tierdb::index::{PagedBTree, StorageBackend};
/// use tierdb::storage::MemoryPageStore;
///
/// let store = MemoryPageStore::new(512);
/// let tree = PagedBTree::open(BufferPoolManager::with_capacity(8, store.clone()).unwrap(), 4).unwrap();
/// tree.put(b"k", b"v").unwrap();
/// tree.sync().unwrap();
/// drop(tree);
///
/// let reopened = PagedBTree::open(BufferPoolManager::with_capacity(8, store).unwrap(), 4).unwrap();
/// assert_eq!(reopened.get(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
///
/// [`sync`]: StorageBackend::sync
pub struct PagedBTree {
    tree: BTreeBackend,
    pool: BufferPoolManager,
    checkpoint: Mutex<Checkpoint>,
    /// Set by every write, cleared by a sync that covers it.
    dirty: AtomicBool,
}

impl PagedBTree {
    /// Load the tree checkpointed in `pool`'s store, or start an empty one
    /// of `order` if the store was never synced.
    ///
    /// A stored tree keeps the order it was saved with.
    ///
    /// # Errors
    /// - `CorruptPage` / `ChecksumMismatch` if the meta page or a node page
    ///   is damaged
    /// - store errors, passed through unchanged
    pub fn open(pool: BufferPoolManager, order: usize) -> Result<Self> {
        let meta = Meta::decode(&pool.get_page(PageId::new(META_PAGE))?)?;

        let (tree, checkpoint) = match meta {
            None => {
                info!(order, "new paged b-tree");
                let checkpoint = Checkpoint {
                    free_list: FreeList::with_watermark(META_PAGE + 1),
                    root: None,
                };
                (BTree::new(order)?, checkpoint)
            }
            Some(meta) => {
                if meta.order as usize != order {
                    warn!(stored = meta.order, requested = order, "keeping stored b-tree order");
                }
                let tree = load_tree(&pool, meta.root, meta.order as usize)?;
                let live = tree_pages(&pool, meta.root)?;

                let mut free_list = FreeList::with_watermark(meta.watermark);
                for page_id in (META_PAGE + 1..meta.watermark).map(PageId::new) {
                    if !live.contains(&page_id) {
                        free_list.free_page(page_id);
                    }
                }
                info!(
                    root = %meta.root,
                    keys = tree.len(),
                    free_pages = free_list.free_count(),
                    "paged b-tree opened"
                );
                (tree, Checkpoint { free_list, root: Some(meta.root) })
            }
        };

        Ok(Self {
            tree: BTreeBackend::from_tree(tree),
            pool,
            checkpoint: Mutex::new(checkpoint),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Root page of the last completed sync.
    pub fn root_page(&self) -> Option<PageId> {
        self.checkpoint.lock().root
    }

    /// Page ids not used by the current checkpoint.
    pub fn free_pages(&self) -> usize {
        self.checkpoint.lock().free_list.free_count()
    }

    pub fn pool(&self) -> &BufferPoolManager {
        &self.pool
    }

    /// Run `f` against the in-memory tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&BTree) -> R) -> R {
        self.tree.with_tree(f)
    }

    fn write_checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        let (root, order) = self.tree.with_tree(|tree| {
            save_tree(tree, &self.pool, &mut checkpoint.free_list).map(|root| (root, tree.order()))
        })?;
        self.pool.flush_dirty_pages()?;

        let meta = Meta {
            root,
            order: order as u32,
            watermark: checkpoint.free_list.next_page_id(),
        };
        self.pool
            .put_page(PageId::new(META_PAGE), meta.encode(self.pool.page_size()).as_slice())?;
        self.pool.flush_dirty_pages()?;

        let released = match checkpoint.root.replace(root) {
            Some(old_root) => release_tree(&self.pool, old_root, &mut checkpoint.free_list)?,
            None => 0,
        };
        debug!(%root, watermark = meta.watermark, released, "paged b-tree synced");
        Ok(())
    }
}

impl StorageBackend for PagedBTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.put(key, value)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.delete(key)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.range_scan(lo, hi)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.tree.scan_prefix(prefix)
    }

    fn is_durable(&self) -> bool {
        true
    }

    /// Checkpoint the tree. Skipped when nothing changed since the last
    /// sync.
    fn sync(&self) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) && checkpoint.root.is_some() {
            return Ok(());
        }

        let result = self.write_checkpoint(&mut checkpoint);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }
}

impl fmt::Debug for PagedBTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedBTree")
            .field("keys", &self.tree.len())
            .field("checkpoint", &*self.checkpoint.lock())
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageStore;

    const PAGE: usize = 512;

    fn open(store: &MemoryPageStore) -> PagedBTree {
        let pool = BufferPoolManager::with_capacity(8, store.clone()).unwrap();
        PagedBTree::open(pool, 4).unwrap()
    }

    fn key(i: u32) -> Vec<u8> {
        format!("key{:04}", i).into_bytes()
    }

    #[test]
    fn test_fresh_store_starts_empty() {
        let store = MemoryPageStore::new(PAGE);
        let tree = open(&store);
        assert!(tree.is_empty());
        assert!(tree.is_durable());
        assert_eq!(tree.root_page(), None);
        assert_eq!(store.page_count(), 0);
    }

    #[test]
    fn test_sync_survives_reopen() {
        let store = MemoryPageStore::new(PAGE);
        {
            let tree = open(&store);
            for i in 0..200 {
                tree.put(&key(i), &i.to_le_bytes()).unwrap();
            }
            tree.delete(&key(7)).unwrap();
            tree.sync().unwrap();
        }

        let tree = open(&store);
        assert_eq!(tree.len(), 199);
        assert_eq!(tree.get(&key(7)).unwrap(), None);
        assert_eq!(tree.get(&key(150)).unwrap(), Some(150u32.to_le_bytes().to_vec()));
        tree.with_tree(|t| t.check_invariants()).unwrap();
    }

    #[test]
    fn test_writes_after_sync_are_not_persisted() {
        let store = MemoryPageStore::new(PAGE);
        {
            let tree = open(&store);
            tree.put(b"kept", b"1").unwrap();
            tree.sync().unwrap();
            tree.put(b"lost", b"2").unwrap();
            tree.delete(b"kept").unwrap();
        }

        let tree = open(&store);
        assert_eq!(tree.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.get(b"lost").unwrap(), None);
    }

    #[test]
    fn test_resync_recycles_pages() {
        let store = MemoryPageStore::new(PAGE);
        let tree = open(&store);
        for i in 0..100 {
            tree.put(&key(i), b"v").unwrap();
        }
        tree.sync().unwrap();
        let first_root = tree.root_page();

        // Clean: nothing is written
        tree.sync().unwrap();
        assert_eq!(tree.root_page(), first_root);
        assert_eq!(tree.free_pages(), 0);

        for round in 0..5u8 {
            tree.put(&key(0), &[round]).unwrap();
            tree.sync().unwrap();
        }
        let nodes = tree.with_tree(|t| t.reachable().len()) as u32;
        let watermark = store.page_count() as u32;
        // Two generations at most: the live tree and the one it replaced
        assert!(watermark <= 1 + 2 * nodes, "watermark {} for {} nodes", watermark, nodes);
        assert_eq!(tree.free_pages() as u32, watermark - 1 - nodes);
        drop(tree);

        let tree = open(&store);
        assert_eq!(tree.free_pages() as u32, watermark - 1 - nodes);
        assert_eq!(tree.get(&key(0)).unwrap(), Some(vec![4]));
    }

    #[test]
    fn test_stored_order_wins() {
        let store = MemoryPageStore::new(PAGE);
        {
            let pool = BufferPoolManager::with_capacity(8, store.clone()).unwrap();
            let tree = PagedBTree::open(pool, 8).unwrap();
            for i in 0..50 {
                tree.put(&key(i), b"v").unwrap();
            }
            tree.sync().unwrap();
        }

        let tree = open(&store);
        assert_eq!(tree.with_tree(BTree::order), 8);
        assert_eq!(tree.len(), 50);
    }

    #[test]
    fn test_damaged_meta_page_is_rejected() {
        let store = MemoryPageStore::new(PAGE);
        {
            let tree = open(&store);
            tree.put(b"k", b"v").unwrap();
            tree.sync().unwrap();
        }

        let pool = BufferPoolManager::with_capacity(8, store.clone()).unwrap();
        {
            let mut page = pool.fetch_page_write(PageId::new(META_PAGE)).unwrap();
            page.as_mut_slice()[PageHeader::SIZE + 5] ^= 0xFF;
        }
        pool.flush_dirty_pages().unwrap();

        let result = PagedBTree::open(pool, 4);
        assert!(matches!(result, Err(Error::ChecksumMismatch(_))));
    }

    #[test]
    fn test_foreign_page_zero_is_rejected() {
        let store = MemoryPageStore::new(PAGE);
        let pool = BufferPoolManager::with_capacity(8, store).unwrap();
        pool.put_page(PageId::new(META_PAGE), &[1, 2, 3]).unwrap();

        let result = PagedBTree::open(pool, 4);
        assert!(matches!(result, Err(Error::CorruptPage { .. })));
    }
}
