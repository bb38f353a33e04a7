//! Disk Manager - file-backed [`PageStore`].
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages at fixed offsets
//! - Growing the file on writes past the end
//! - Truncating after page-space compaction

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{PageId, Result};
use crate::storage::page::Page;
use crate::storage::page_store::PageStore;

/// Manages disk I/O for a single database file.
///
/// # File Layout
/// The database is stored as a single file with pages laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │ Page 2  │  ...    │ Page N  │
/// └─────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      P       2P       ...      N×P
/// ```
///
/// Page N is located at file offset `N × page_size`. Reading a page past the
/// end of the file yields zeroes.
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The `BufferPoolManager` is responsible
/// for serializing access to the store.
///
/// # Durability
/// Writes are not fsynced individually; `sync()` fsyncs the file once, which
/// the buffer pool calls after each batch of flushed pages.
pub struct DiskManager {
    file: File,
    page_size: usize,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new database file with the default page size.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_page_size(path, PAGE_SIZE)
    }

    /// Create a new database file with `page_size`-byte pages.
    pub fn create_with_page_size<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            page_size,
            page_count: 0,
        })
    }

    /// Open an existing database file with the default page size.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_page_size(path, PAGE_SIZE)
    }

    /// Open an existing database file with `page_size`-byte pages.
    pub fn open_with_page_size<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // Calculate page count from file size
        let file_size = file.metadata()?.len();
        let page_count = (file_size / page_size as u64) as u32;

        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }

    /// Open an existing database file, or create if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Get the number of pages in the database.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the database file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (self.page_size as u64)
    }
}

impl PageStore for DiskManager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        let mut page = Page::new(self.page_size);
        if page_id.as_u32() >= self.page_count {
            return Ok(page);
        }

        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.read_exact(page.as_mut_slice())?;

        Ok(page)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_id.offset(self.page_size)))?;
        self.file.write_all(page.as_slice())?;

        // Writing past the end leaves a zero-filled hole for skipped pages
        self.page_count = self.page_count.max(page_id.as_u32() + 1);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, pages: u32) -> Result<()> {
        if pages < self.page_count {
            self.file.set_len(pages as u64 * self.page_size as u64)?;
            self.page_count = pages;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManager::create(&path).unwrap();
        assert_eq!(dm.page_count(), 0);
        assert_eq!(dm.file_size(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(DiskManager::create(&path).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(DiskManager::open(&path).is_err());
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        let page = dm.read_page(PageId::new(3)).unwrap();
        assert_eq!(page.size(), PAGE_SIZE);
        assert!(page.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_extends_file() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        let mut page = Page::new(PAGE_SIZE);
        page.as_mut_slice()[0] = 0xAB;
        page.as_mut_slice()[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(PageId::new(2), &page).unwrap();

        assert_eq!(dm.page_count(), 3);
        assert_eq!(dm.file_size(), 3 * PAGE_SIZE as u64);

        let hole = dm.read_page(PageId::new(1)).unwrap();
        assert_eq!(hole.as_slice()[0], 0);

        let read_page = dm.read_page(PageId::new(2)).unwrap();
        assert_eq!(read_page.as_slice()[0], 0xAB);
        assert_eq!(read_page.as_slice()[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        // Create and write
        {
            let mut dm = DiskManager::create(&path).unwrap();
            let mut page = Page::new(PAGE_SIZE);
            page.as_mut_slice()[0] = 0x42;
            dm.write_page(PageId::new(0), &page).unwrap();
            dm.sync().unwrap();
        }

        // Reopen and verify
        {
            let mut dm = DiskManager::open(&path).unwrap();
            assert_eq!(dm.page_count(), 1);

            let page = dm.read_page(PageId::new(0)).unwrap();
            assert_eq!(page.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn test_custom_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.db");

        let mut dm = DiskManager::create_with_page_size(&path, 512).unwrap();
        for i in 0..10u32 {
            let mut page = Page::new(512);
            page.as_mut_slice()[0] = i as u8;
            dm.write_page(PageId::new(i), &page).unwrap();
        }
        assert_eq!(dm.file_size(), 10 * 512);

        for i in 0..10u32 {
            let page = dm.read_page(PageId::new(i)).unwrap();
            assert_eq!(page.as_slice()[0], i as u8);
        }
    }

    #[test]
    fn test_truncate_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let mut dm = DiskManager::create_with_page_size(&path, 512).unwrap();
        let page = Page::new(512);
        for i in 0..4 {
            dm.write_page(PageId::new(i), &page).unwrap();
        }

        dm.truncate(1).unwrap();
        assert_eq!(dm.page_count(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 512);
    }

    #[test]
    fn test_open_or_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        // First call creates
        {
            let mut dm = DiskManager::open_or_create(&path).unwrap();
            assert_eq!(dm.page_count(), 0);
            dm.write_page(PageId::new(0), &Page::new(PAGE_SIZE)).unwrap();
        }

        // Second call opens existing
        {
            let dm = DiskManager::open_or_create(&path).unwrap();
            assert_eq!(dm.page_count(), 1);
        }
    }
}
