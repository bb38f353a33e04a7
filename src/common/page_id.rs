//! Page identifier type.

use std::fmt;

/// Identifies a page in a page store.
///
/// Page ids are handed out by [`FreeList`](crate::storage::FreeList): recycled
/// ids first, then a dense watermark starting at 0.
///
/// # Example
/// ```
/// use tierdb::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.as_u32(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel meaning "no page". Never returned by the allocator.
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Raw numeric value.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Byte offset of this page in a store laid out as consecutive pages.
    #[inline]
    pub fn offset(self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }

    /// Check if this page ID is valid (not the sentinel value).
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "Page(INVALID)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
