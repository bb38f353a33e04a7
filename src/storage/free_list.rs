//! Free list - page id allocation and recycling.
//!
//! Freed page ids go onto a stack and are handed out again before any new id
//! is minted, so the page space only grows when nothing can be reused.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::common::PageId;

/// Result of [`FreeList::compact`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageCompaction {
    /// Live pages under their new, dense ids.
    pub pages: BTreeMap<PageId, Vec<u8>>,
    /// Old id → new id for every live page.
    pub remap: HashMap<PageId, PageId>,
}

/// Tracks recycled page ids and the allocation watermark.
///
/// # Example
/// ```
/// use tierdb::common::PageId;
/// use tierdb::storage::FreeList;
///
/// let mut free_list = FreeList::new();
/// let a = free_list.allocate_page();
/// let _b = free_list.allocate_page();
/// free_list.free_page(a);
///
/// assert_eq!(free_list.allocate_page(), a);
/// assert_eq!(free_list.allocate_page(), PageId::new(2));
/// ```
#[derive(Debug, Default)]
pub struct FreeList {
    /// Recycled ids, most recently freed last.
    free_pages: Vec<PageId>,
    /// Mirror of `free_pages` for idempotent frees.
    free_set: HashSet<PageId>,
    next_page_id: u32,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free list whose watermark starts at `next_page_id`.
    pub fn with_watermark(next_page_id: u32) -> Self {
        Self {
            next_page_id,
            ..Self::default()
        }
    }

    /// Hand out a page id: the most recently freed one, or a new one.
    pub fn allocate_page(&mut self) -> PageId {
        if let Some(page_id) = self.free_pages.pop() {
            self.free_set.remove(&page_id);
            debug!(%page_id, "recycling page");
            return page_id;
        }

        let page_id = PageId::new(self.next_page_id);
        self.next_page_id += 1;
        page_id
    }

    /// Return `page_id` for reuse. Freeing an id twice has no effect.
    ///
    /// Ids at or above the watermark were never handed out and are ignored,
    /// so a later allocation can never return an id that is also minted.
    pub fn free_page(&mut self, page_id: PageId) {
        if page_id.as_u32() >= self.next_page_id {
            warn!(%page_id, next_page_id = self.next_page_id, "ignoring free of unallocated page");
            return;
        }
        if self.free_set.insert(page_id) {
            self.free_pages.push(page_id);
            debug!(%page_id, "freed page");
        }
    }

    /// Share of minted ids currently free, in `[0, 1]`.
    pub fn fragmentation(&self) -> f64 {
        if self.next_page_id == 0 {
            return 0.0;
        }
        self.free_pages.len() as f64 / self.next_page_id as f64
    }

    /// Number of ids ever minted.
    #[inline]
    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    /// Whether `page_id` is waiting for reuse.
    #[inline]
    pub fn is_free(&self, page_id: PageId) -> bool {
        self.free_set.contains(&page_id)
    }

    /// Number of ids waiting for reuse.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_pages.len()
    }

    /// Renumber the live pages densely from zero.
    ///
    /// `pages` maps every known id to its contents, `None` marking a dead
    /// page. Live pages keep their relative order. Afterwards the watermark
    /// equals the live page count and nothing is free.
    pub fn compact(&mut self, pages: BTreeMap<PageId, Option<Vec<u8>>>) -> PageCompaction {
        let before = pages.len();
        let mut compaction = PageCompaction::default();

        for (old_id, data) in pages {
            if let Some(data) = data {
                let new_id = PageId::new(compaction.pages.len() as u32);
                compaction.pages.insert(new_id, data);
                compaction.remap.insert(old_id, new_id);
            }
        }

        self.free_pages.clear();
        self.free_set.clear();
        self.next_page_id = compaction.pages.len() as u32;

        info!(
            before,
            after = compaction.pages.len(),
            "compacted page space"
        );
        compaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocate_ten() -> FreeList {
        let mut free_list = FreeList::new();
        for i in 0..10 {
            assert_eq!(free_list.allocate_page(), PageId::new(i));
        }
        free_list
    }

    #[test]
    fn test_empty_fragmentation_is_zero() {
        assert_eq!(FreeList::new().fragmentation(), 0.0);
    }

    #[test]
    fn test_reuse_is_lifo() {
        let mut free_list = allocate_ten();
        for id in [2, 5, 7] {
            free_list.free_page(PageId::new(id));
        }
        assert!((free_list.fragmentation() - 0.3).abs() < f64::EPSILON);

        let reused: Vec<u32> = (0..5).map(|_| free_list.allocate_page().as_u32()).collect();
        assert_eq!(reused, vec![7, 5, 2, 10, 11]);
        assert_eq!(free_list.next_page_id(), 12);
        assert_eq!(free_list.fragmentation(), 0.0);
    }

    #[test]
    fn test_double_free_is_noop() {
        let mut free_list = allocate_ten();
        free_list.free_page(PageId::new(4));
        free_list.free_page(PageId::new(4));

        assert_eq!(free_list.free_count(), 1);
        assert_eq!(free_list.allocate_page(), PageId::new(4));
        assert_eq!(free_list.allocate_page(), PageId::new(10));
    }

    #[test]
    fn test_free_above_watermark_is_ignored() {
        let mut free_list = FreeList::new();
        free_list.free_page(PageId::new(2));
        assert_eq!(free_list.free_count(), 0);

        let ids: Vec<u32> = (0..4).map(|_| free_list.allocate_page().as_u32()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let mut free_list = FreeList::with_watermark(5);
        free_list.free_page(PageId::new(5));
        free_list.free_page(PageId::new(4));
        assert_eq!(free_list.allocate_page(), PageId::new(4));
        assert_eq!(free_list.allocate_page(), PageId::new(5));
        assert_eq!(free_list.allocate_page(), PageId::new(6));
    }

    #[test]
    fn test_compact_renumbers_densely() {
        let mut free_list = allocate_ten();
        let mut pages = BTreeMap::new();
        for i in 0..10u32 {
            let live = matches!(i, 2 | 5 | 9);
            if !live {
                free_list.free_page(PageId::new(i));
            }
            pages.insert(PageId::new(i), live.then(|| vec![i as u8]));
        }

        let compaction = free_list.compact(pages);

        assert_eq!(compaction.pages.len(), 3);
        assert_eq!(compaction.pages[&PageId::new(0)], vec![2]);
        assert_eq!(compaction.pages[&PageId::new(1)], vec![5]);
        assert_eq!(compaction.pages[&PageId::new(2)], vec![9]);
        assert_eq!(compaction.remap[&PageId::new(9)], PageId::new(2));
        assert!(!compaction.remap.contains_key(&PageId::new(0)));

        assert_eq!(free_list.next_page_id(), 3);
        assert_eq!(free_list.free_count(), 0);
        assert_eq!(free_list.fragmentation(), 0.0);
        assert_eq!(free_list.allocate_page(), PageId::new(3));
    }
}
