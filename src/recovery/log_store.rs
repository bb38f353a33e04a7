//! Byte-level storage for the write-ahead log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::Result;

/// Append-only byte log with a durability barrier.
///
/// Bytes passed to `append` may be lost in a crash until `sync` returns.
pub trait LogStore: Send {
    fn append(&mut self, bytes: &[u8]) -> Result<()>;

    /// Make every appended byte durable.
    fn sync(&mut self) -> Result<()>;

    /// Everything appended so far, synced or not.
    fn read_all(&mut self) -> Result<Vec<u8>>;

    /// Atomically replace the whole log with `bytes`, durably.
    fn replace(&mut self, bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryLog {
    durable: Vec<u8>,
    pending: Vec<u8>,
    syncs: u64,
}

/// A log held in memory that can simulate a crash.
///
/// Cloning yields another handle to the same log, so a test can keep one
/// handle, "crash" the writer and reopen from the surviving bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<Mutex<MemoryLog>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every byte not yet synced.
    pub fn crash(&self) {
        self.inner.lock().pending.clear();
    }

    /// Bytes that would survive a crash.
    pub fn durable_bytes(&self) -> Vec<u8> {
        self.inner.lock().durable.clone()
    }

    pub fn syncs(&self) -> u64 {
        self.inner.lock().syncs
    }
}

impl LogStore for MemoryLogStore {
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.lock().pending.extend_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let mut log = self.inner.lock();
        let pending = std::mem::take(&mut log.pending);
        log.durable.extend_from_slice(&pending);
        log.syncs += 1;
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        let log = self.inner.lock();
        let mut bytes = log.durable.clone();
        bytes.extend_from_slice(&log.pending);
        Ok(bytes)
    }

    fn replace(&mut self, bytes: &[u8]) -> Result<()> {
        let mut log = self.inner.lock();
        log.durable = bytes.to_vec();
        log.pending.clear();
        log.syncs += 1;
        Ok(())
    }
}

/// A log in a single append-mode file.
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    file: File,
}

impl FileLogStore {
    /// Open the log at `path`, creating an empty one if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_append(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

impl LogStore for FileLogStore {
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    fn replace(&mut self, bytes: &[u8]) -> Result<()> {
        // Write aside, then rename over the old log
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = Self::open_append(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_crash_keeps_synced_bytes() {
        let store = MemoryLogStore::new();
        let mut writer = store.clone();

        writer.append(b"one\n").unwrap();
        writer.sync().unwrap();
        writer.append(b"two\n").unwrap();
        assert_eq!(writer.read_all().unwrap(), b"one\ntwo\n");

        store.crash();
        assert_eq!(store.durable_bytes(), b"one\n");
        assert_eq!(writer.read_all().unwrap(), b"one\n");
        assert_eq!(store.syncs(), 1);
    }

    #[test]
    fn test_memory_store_replace() {
        let mut store = MemoryLogStore::new();
        store.append(b"old\n").unwrap();
        store.replace(b"new\n").unwrap();
        assert_eq!(store.read_all().unwrap(), b"new\n");
        assert_eq!(store.durable_bytes(), b"new\n");
    }

    #[test]
    fn test_file_store_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tier.wal");

        {
            let mut store = FileLogStore::open(&path).unwrap();
            store.append(b"a\n").unwrap();
            store.append(b"b\n").unwrap();
            store.sync().unwrap();
        }

        let mut store = FileLogStore::open(&path).unwrap();
        assert_eq!(store.read_all().unwrap(), b"a\nb\n");

        store.replace(b"b\n").unwrap();
        store.append(b"c\n").unwrap();
        assert_eq!(store.read_all().unwrap(), b"b\nc\n");
        assert!(!path.with_extension("tmp").exists());
    }
}
