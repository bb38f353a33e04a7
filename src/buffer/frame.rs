//! Frame - one cache slot of the buffer pool.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// Bookkeeping the pool needs to decide what a frame may be used for.
#[derive(Debug, Default, Clone, Copy)]
struct FrameMeta {
    page_id: Option<PageId>,
    pins: u32,
    dirty: bool,
}

/// A cache slot: a page buffer plus the id, pin count and dirty bit of
/// whatever page it holds.
///
/// The buffer starts out zero-length and is sized on first [`install`],
/// so frames that never hold a page never allocate.
///
/// The page bytes sit behind their own `RwLock` so readers of one page do
/// not contend with pool bookkeeping on another. Pin changes happen under
/// the pool's state lock; the metadata mutex only makes single reads and
/// writes of it consistent.
///
/// [`install`]: Frame::install
pub struct Frame {
    page: RwLock<Page>,
    meta: Mutex<FrameMeta>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            page: RwLock::new(Page::new(0)),
            meta: Mutex::new(FrameMeta::default()),
        }
    }

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Make this frame hold `page_id`, sizing the buffer to `page_size`.
    ///
    /// `contents` is copied in; `None` leaves the page zeroed. The frame
    /// comes out clean. Pins are left alone.
    pub(crate) fn install(&self, page_id: PageId, page_size: usize, contents: Option<&Page>) {
        {
            let mut page = self.page.write();
            page.resize(page_size);
            if let Some(contents) = contents {
                page.fill_from(contents.as_slice());
            }
        }
        let mut meta = self.meta.lock();
        meta.page_id = Some(page_id);
        meta.dirty = false;
    }

    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        self.meta.lock().page_id
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        self.meta.lock().page_id = page_id;
    }

    /// Add a pin. Returns the new count.
    #[inline]
    pub fn pin(&self) -> u32 {
        let mut meta = self.meta.lock();
        meta.pins += 1;
        meta.pins
    }

    /// Drop a pin. Returns the new count.
    ///
    /// # Panics
    /// If the frame is not pinned.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let mut meta = self.meta.lock();
        assert!(meta.pins > 0, "pin count underflow");
        meta.pins -= 1;
        meta.pins
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.meta.lock().pins
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    #[inline]
    pub fn mark_dirty(&self) {
        self.meta.lock().dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.meta.lock().dirty = false;
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.meta.lock().dirty
    }

    /// Holds a page nobody has pinned.
    pub fn is_evictable(&self) -> bool {
        let meta = self.meta.lock();
        meta.page_id.is_some() && meta.pins == 0
    }

    /// Forget the page. The buffer is zeroed but keeps its size.
    pub fn reset(&self) {
        self.page.write().reset();
        *self.meta.lock() = FrameMeta::default();
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}
