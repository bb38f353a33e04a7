//! Page - the fixed-size unit of storage.
//!
//! A [`Page`] is a raw byte buffer whose length is the configured page size.
//! Every page in one store or buffer pool has the same size.

use super::page_header::PageHeader;

/// A page of data.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code: copying a page is
/// expensive and should be explicit (`Page::from_slice(other.as_slice())`).
/// A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use tierdb::storage::page::Page;
///
/// let mut page = Page::new(4096);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.size(), 4096);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page of `size` bytes.
    #[inline]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Copy `bytes` into a new page of exactly that length.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec().into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size of this page in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Overwrite the page with `bytes`, zero-filling any tail.
    ///
    /// Bytes beyond the page size are ignored.
    pub fn fill_from(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.data[n..].fill(0);
    }

    /// Resize to `size` bytes and zero the contents.
    ///
    /// Frames allocate their buffer lazily through this.
    pub fn resize(&mut self, size: usize) {
        if self.data.len() != size {
            self.data = vec![0u8; size].into_boxed_slice();
        } else {
            self.reset();
        }
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Page::from_slice(&self.data)
    }
}
