//! Page store contract and the in-memory store.
//!
//! The buffer pool never touches a disk directly. It talks to whatever
//! implements [`PageStore`]: a [`DiskManager`](super::DiskManager) in
//! production, a [`MemoryPageStore`] in tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Fixed-size page I/O.
///
/// Pages that were never written read back as zeroes. Errors from the store
/// are passed to the buffer pool's callers unchanged.
pub trait PageStore: Send {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;

    /// Read one page.
    fn read_page(&mut self, page_id: PageId) -> Result<Page>;

    /// Write one page. `page.size()` must equal `page_size()`.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()>;

    /// Make every completed write durable.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop every page with id `>= pages`.
    fn truncate(&mut self, _pages: u32) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryPages {
    pages: HashMap<PageId, Box<[u8]>>,
    reads: u64,
    writes: u64,
    syncs: u64,
    unavailable: bool,
}

/// A page store held entirely in memory.
///
/// Cloning yields another handle to the same pages, so a test can hand one
/// handle to a buffer pool and keep the other to inspect what reached
/// "disk".
#[derive(Debug, Clone)]
pub struct MemoryPageStore {
    page_size: usize,
    inner: Arc<Mutex<MemoryPages>>,
}

impl MemoryPageStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            inner: Arc::new(Mutex::new(MemoryPages::default())),
        }
    }

    /// Number of `read_page` calls served.
    pub fn reads(&self) -> u64 {
        self.inner.lock().reads
    }

    /// Number of `write_page` calls served.
    pub fn writes(&self) -> u64 {
        self.inner.lock().writes
    }

    /// Number of `sync` calls served.
    pub fn syncs(&self) -> u64 {
        self.inner.lock().syncs
    }

    /// Number of pages ever written and not truncated.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Copy of a stored page, bypassing the counters.
    pub fn peek(&self, page_id: PageId) -> Option<Vec<u8>> {
        self.inner.lock().pages.get(&page_id).map(|p| p.to_vec())
    }

    /// Make every subsequent call fail with `PageStoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(Error::PageStoreUnavailable {
                page_id,
                reason: "store offline".into(),
            });
        }
        inner.reads += 1;
        Ok(match inner.pages.get(&page_id) {
            Some(bytes) => Page::from_slice(bytes),
            None => Page::new(self.page_size),
        })
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.unavailable {
            return Err(Error::PageStoreUnavailable {
                page_id,
                reason: "store offline".into(),
            });
        }
        debug_assert_eq!(page.size(), self.page_size);
        inner.writes += 1;
        inner.pages.insert(page_id, page.as_slice().into());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.lock().syncs += 1;
        Ok(())
    }

    fn truncate(&mut self, pages: u32) -> Result<()> {
        self.inner.lock().pages.retain(|id, _| id.as_u32() < pages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_page_reads_zeroes() {
        let mut store = MemoryPageStore::new(256);
        let page = store.read_page(PageId::new(9)).unwrap();
        assert_eq!(page.size(), 256);
        assert!(page.as_slice().iter().all(|&b| b == 0));
        assert_eq!(store.reads(), 1);
    }

    #[test]
    fn test_write_visible_through_other_handle() {
        let mut store = MemoryPageStore::new(256);
        let observer = store.clone();

        let mut page = Page::new(256);
        page.as_mut_slice()[0] = 7;
        store.write_page(PageId::new(1), &page).unwrap();

        assert_eq!(observer.writes(), 1);
        assert_eq!(observer.peek(PageId::new(1)).unwrap()[0], 7);
    }

    #[test]
    fn test_truncate_drops_tail() {
        let mut store = MemoryPageStore::new(256);
        let page = Page::new(256);
        for i in 0..5 {
            store.write_page(PageId::new(i), &page).unwrap();
        }

        store.truncate(2).unwrap();
        assert_eq!(store.page_count(), 2);
        assert!(store.peek(PageId::new(3)).is_none());
    }

    #[test]
    fn test_unavailable_store_errors() {
        let mut store = MemoryPageStore::new(256);
        store.set_unavailable(true);

        let result = store.read_page(PageId::new(0));
        assert!(matches!(result, Err(Error::PageStoreUnavailable { .. })));
    }
}
