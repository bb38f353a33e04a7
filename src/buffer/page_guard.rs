//! Pinned, locked views of a cached page.
//!
//! A guard holds the frame's page lock and one pin. Dropping it releases
//! the lock first, then the pin, so an unpinned frame is never still locked
//! by its last user.

use std::ops::{Deref, DerefMut};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId};
use crate::storage::page::Page;

use super::buffer_pool_manager::BufferPoolManager;

/// One pin on a frame, returned to the pool on drop.
struct Pin<'a> {
    pool: &'a BufferPoolManager,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
}

impl Drop for Pin<'_> {
    fn drop(&mut self) {
        self.pool.unpin_frame(self.frame_id, self.dirty);
    }
}

/// Shared access to a page. Any number may coexist.
pub struct PageReadGuard<'a> {
    // Field order is drop order: lock before pin
    lock: RwLockReadGuard<'a, Page>,
    pin: Pin<'a>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockReadGuard<'a, Page>,
    ) -> Self {
        Self {
            lock,
            pin: Pin {
                pool,
                frame_id,
                page_id,
                dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.pin.frame_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.lock
    }
}

/// Exclusive access to a page.
///
/// The page is marked dirty on drop if the guard was ever dereferenced
/// mutably; a write guard only read through leaves the page clean.
///
/// ```ignore
/// let mut guard = pool.fetch_page_write(page_id)?;
/// guard.as_mut_slice()[0] = 0xFF;
/// ```
pub struct PageWriteGuard<'a> {
    lock: RwLockWriteGuard<'a, Page>,
    pin: Pin<'a>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPoolManager,
        frame_id: FrameId,
        page_id: PageId,
        lock: RwLockWriteGuard<'a, Page>,
    ) -> Self {
        Self {
            lock,
            pin: Pin {
                pool,
                frame_id,
                page_id,
                dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id
    }

    pub fn frame_id(&self) -> FrameId {
        self.pin.frame_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.lock
    }
}

impl DerefMut for PageWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        self.pin.dirty = true;
        &mut self.lock
    }
}
