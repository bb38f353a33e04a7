//! Buffer Pool Manager - the core page caching layer.
//!
//! The [`BufferPoolManager`] provides:
//! - Page caching between a [`PageStore`] and memory
//! - LRU eviction with write-back of dirty pages
//! - Pin-based reference counting through RAII guards
//! - Batched flushing with a single durable sync

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{BufferPoolStats, Frame, PageReadGuard, PageWriteGuard};
use crate::common::config::{validate_page_size, BufferPoolConfig};
use crate::common::{Error, FrameId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::{FreeList, PageStore};

/// Mapping state, always changed together under one lock.
struct PoolState {
    /// Cached page → frame holding it.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page (LIFO for cache locality).
    free_frames: Vec<FrameId>,
    replacer: LruReplacer,
}

/// How a missing page is brought into a frame.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Read through the store; counts as a lookup.
    Read,
    /// The caller overwrites the whole page; skip the store read.
    Overwrite,
}

/// Manages a pool of frames caching pages of a [`PageStore`].
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                    BufferPoolManager                        │
/// │  ┌─────────────── state: Mutex ──────────────┐              │
/// │  │ page_table   free_frames   LruReplacer    │              │
/// │  │ PageId→Fid   Vec<FrameId>  MRU ... LRU    │              │
/// │  └───────────────────────────────────────────┘              │
/// │        │                                                    │
/// │        ▼                                                    │
/// │  frames: Vec<Frame>  [Frame0] [Frame1] [Frame2] ...         │
/// │                                                             │
/// │  store: Mutex<Box<dyn PageStore>>                           │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `state`: one `Mutex`; pinning, unpinning and eviction decisions all
///   happen under it, so a frame can never be evicted between being looked
///   up and being pinned
/// - `frames`: fixed size, each [`Frame`] has its own page `RwLock`
/// - `store`: `Mutex`, single-threaded I/O
/// - `stats`: atomic counters
///
/// Lock order is `state` → frame page lock → `store`.
///
/// # Usage
/// ```
/// use tierdb::buffer::BufferPoolManager;
/// use tierdb::common::PageId;
/// use tierdb::storage::MemoryPageStore;
///
/// let pool = BufferPoolManager::with_capacity(8, MemoryPageStore::new(4096)).unwrap();
/// pool.put_page(PageId::new(0), b"hello").unwrap();
///
/// let page = pool.get_page(PageId::new(0)).unwrap();
/// assert_eq!(&page.as_slice()[..5], b"hello");
/// ```
pub struct BufferPoolManager {
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    store: Mutex<Box<dyn PageStore>>,
    stats: BufferPoolStats,
    page_size: usize,
}

impl BufferPoolManager {
    /// Create a pool sized by `config` over `store`.
    ///
    /// # Errors
    /// `InvalidConfig` if the config is out of range or its page size
    /// differs from the store's.
    pub fn new(config: BufferPoolConfig, store: impl PageStore + 'static) -> Result<Self> {
        config.validate()?;
        if config.page_size != store.page_size() {
            return Err(Error::InvalidConfig(format!(
                "buffer pool page size {} does not match store page size {}",
                config.page_size,
                store.page_size()
            )));
        }
        Self::with_capacity(config.capacity_pages(), store)
    }

    /// Create a pool of exactly `pool_size` frames over `store`.
    ///
    /// # Errors
    /// `InvalidConfig` if `pool_size` is zero or the store's page size is
    /// not a power of two of at least [`MIN_PAGE_SIZE`] bytes.
    ///
    /// [`MIN_PAGE_SIZE`]: crate::common::config::MIN_PAGE_SIZE
    pub fn with_capacity(pool_size: usize, store: impl PageStore + 'static) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be > 0".into()));
        }

        let page_size = store.page_size();
        validate_page_size(page_size)?;
        let frames: Vec<Frame> = (0..pool_size).map(|_| Frame::new()).collect();
        // Reversed so that frame 0 is handed out first
        let free_frames: Vec<FrameId> = (0..pool_size).rev().map(FrameId::new).collect();

        debug!(pool_size, page_size, "buffer pool created");
        Ok(Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_frames,
                replacer: LruReplacer::new(),
            }),
            store: Mutex::new(Box::new(store)),
            stats: BufferPoolStats::new(),
            page_size,
        })
    }

    // ========================================================================
    // Public API: Page copies
    // ========================================================================

    /// Return a copy of the page, reading it through the store on a miss.
    ///
    /// # Errors
    /// - `NoFreeFrames` if the page is not cached and every frame is pinned
    /// - store errors, passed through unchanged
    pub fn get_page(&self, page_id: PageId) -> Result<Page> {
        let guard = self.fetch_page_read(page_id)?;
        Ok(Page::from_slice(guard.as_slice()))
    }

    /// Overwrite the page with `data` and mark it dirty.
    ///
    /// The page is installed without reading the store first. Nothing is
    /// written through; the new contents reach the store on eviction or
    /// flush. `data` shorter than a page is zero-padded, longer is truncated.
    pub fn put_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let frame_id = self.fetch_frame(page_id, FetchMode::Overwrite)?;
        let mut guard =
            PageWriteGuard::new(self, frame_id, page_id, self.frames[frame_id.0].page_mut());
        guard.fill_from(data);
        Ok(())
    }

    // ========================================================================
    // Public API: Pinned access
    // ========================================================================

    /// Fetch a page for reading (shared access).
    ///
    /// The page stays pinned until the guard drops.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame_id = self.fetch_frame(page_id, FetchMode::Read)?;
        let lock = self.frames[frame_id.0].page();

        Ok(PageReadGuard::new(self, frame_id, page_id, lock))
    }

    /// Fetch a page for writing (exclusive access).
    ///
    /// The page is marked dirty when the guard drops, if it was written
    /// through.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame_id = self.fetch_frame(page_id, FetchMode::Read)?;
        let lock = self.frames[frame_id.0].page_mut();

        Ok(PageWriteGuard::new(self, frame_id, page_id, lock))
    }

    // ========================================================================
    // Public API: Flushing
    // ========================================================================

    /// Write one page back if it is cached and dirty.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => {
                    self.frames[frame_id.0].pin();
                    frame_id
                }
                None => return Ok(()),
            }
        };

        let result = self.write_back(frame_id, page_id);
        self.unpin_frame(frame_id, false);
        result
    }

    /// Write every dirty page back, then make the writes durable with one
    /// store `sync`.
    ///
    /// Afterwards no page is dirty, unless a writer dirtied one concurrently.
    pub fn flush_dirty_pages(&self) -> Result<()> {
        let dirty: Vec<(PageId, FrameId)> = {
            let state = self.state.lock();
            state
                .page_table
                .iter()
                .filter(|(_, frame_id)| self.frames[frame_id.0].is_dirty())
                .map(|(&page_id, &frame_id)| {
                    self.frames[frame_id.0].pin();
                    (page_id, frame_id)
                })
                .collect()
        };

        let mut result = Ok(());
        for &(page_id, frame_id) in &dirty {
            if result.is_ok() {
                result = self.write_back(frame_id, page_id);
            }
            self.unpin_frame(frame_id, false);
        }
        result?;

        self.store.lock().sync()?;
        self.stats.record_flush();
        debug!(pages = dirty.len(), "flushed dirty pages");
        Ok(())
    }

    // ========================================================================
    // Public API: Removal and compaction
    // ========================================================================

    /// Drop a page from the pool without writing it back.
    ///
    /// Does nothing if the page is not cached.
    ///
    /// # Errors
    /// `PagePinned` if a guard on the page is alive.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };
        if self.frames[frame_id.0].is_pinned() {
            return Err(Error::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        self.frames[frame_id.0].reset();
        state.free_frames.push(frame_id);
        Ok(())
    }

    /// Compact the page space described by `free_list`.
    ///
    /// Runs entirely under the pool lock: every dirty page is written back,
    /// the live pages are read from the store, renumbered densely by
    /// [`FreeList::compact`], written to their new ids, and the store is
    /// truncated. All cached frames are dropped, since their ids are stale.
    ///
    /// Returns the old → new id mapping of the live pages.
    ///
    /// # Errors
    /// `PagePinned` if any page is pinned; nothing is changed in that case.
    pub fn compact_page_space(&self, free_list: &mut FreeList) -> Result<HashMap<PageId, PageId>> {
        let mut state = self.state.lock();

        if let Some((&page_id, _)) = state
            .page_table
            .iter()
            .find(|(_, frame_id)| self.frames[frame_id.0].is_pinned())
        {
            return Err(Error::PagePinned(page_id));
        }

        let mut store = self.store.lock();
        for (&page_id, &frame_id) in &state.page_table {
            let frame = &self.frames[frame_id.0];
            if frame.is_dirty() {
                store.write_page(page_id, &frame.page())?;
                frame.clear_dirty();
                self.stats.record_write();
            }
        }

        let mut live = BTreeMap::new();
        for id in 0..free_list.next_page_id() {
            let page_id = PageId::new(id);
            let data = if free_list.is_free(page_id) {
                None
            } else {
                self.stats.record_read();
                Some(store.read_page(page_id)?.as_slice().to_vec())
            };
            live.insert(page_id, data);
        }

        let compaction = free_list.compact(live);
        for (&page_id, data) in &compaction.pages {
            store.write_page(page_id, &Page::from_slice(data))?;
            self.stats.record_write();
        }
        store.truncate(compaction.pages.len() as u32)?;
        store.sync()?;
        drop(store);

        let cached: Vec<FrameId> = state.page_table.drain().map(|(_, fid)| fid).collect();
        for frame_id in cached {
            state.replacer.remove(frame_id);
            self.frames[frame_id.0].reset();
            state.free_frames.push(frame_id);
        }

        info!(live_pages = compaction.pages.len(), "page space compacted");
        Ok(compaction.remap)
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_frames.len()
    }

    /// Number of cached pages.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Number of cached pages not yet written back.
    pub fn dirty_page_count(&self) -> usize {
        let state = self.state.lock();
        state
            .page_table
            .values()
            .filter(|frame_id| self.frames[frame_id.0].is_dirty())
            .count()
    }

    // ========================================================================
    // Internal: Called by PageGuard on drop
    // ========================================================================

    /// Release one pin, marking the page dirty first if requested.
    pub(crate) fn unpin_frame(&self, frame_id: FrameId, is_dirty: bool) {
        let frame = &self.frames[frame_id.0];
        if is_dirty {
            frame.mark_dirty();
        }

        let mut state = self.state.lock();
        if frame.unpin() == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }

    // ========================================================================
    // Internal: Core fetch logic
    // ========================================================================

    /// Bring `page_id` into a frame and pin it.
    fn fetch_frame(&self, page_id: PageId, mode: FetchMode) -> Result<FrameId> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            self.frames[frame_id.0].pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            if mode == FetchMode::Read {
                self.stats.record_hit();
            }
            trace!(%page_id, %frame_id, "buffer pool hit");
            return Ok(frame_id);
        }

        if mode == FetchMode::Read {
            self.stats.record_miss();
        }
        let frame_id = self.acquire_frame(&mut state)?;

        let contents = match mode {
            FetchMode::Read => match self.store.lock().read_page(page_id) {
                Ok(page) => {
                    self.stats.record_read();
                    Some(page)
                }
                Err(e) => {
                    state.free_frames.push(frame_id);
                    return Err(e);
                }
            },
            FetchMode::Overwrite => None,
        };

        let frame = &self.frames[frame_id.0];
        frame.install(page_id, self.page_size, contents.as_ref());
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(frame_id)
    }

    /// Take a free frame, or evict the least recently used unpinned page.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_frames.pop() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.evict().ok_or(Error::NoFreeFrames)?;
        let frame = &self.frames[frame_id.0];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                if let Err(e) = self.write_back(frame_id, old_page_id) {
                    // Keep the page cached so its contents are not lost
                    state.replacer.record_access(frame_id);
                    state.replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
            }
            state.page_table.remove(&old_page_id);
            debug!(page_id = %old_page_id, %frame_id, "evicted page");
        }

        self.stats.record_eviction();
        frame.set_page_id(None);
        frame.clear_dirty();
        Ok(frame_id)
    }

    /// Write a frame's page to the store if it is dirty.
    fn write_back(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let frame = &self.frames[frame_id.0];

        // Holding the read lock keeps writers out between write and clear
        let page = frame.page();
        if frame.is_dirty() {
            self.store.lock().write_page(page_id, &page)?;
            frame.clear_dirty();
            self.stats.record_write();
        }
        Ok(())
    }
}
