//! Write-ahead log.

use tracing::{debug, error, info};

use super::log_entry::{LogEntry, LogEntryType};
use super::log_store::LogStore;
use crate::common::config::WalConfig;
use crate::common::{Error, Lsn, Result};

/// Buffered, append-only log of [`LogEntry`] records.
///
/// ```text
///   append ──► buffer ──(full or flush)──► LogStore ──sync──► durable
/// ```
///
/// LSNs start at 1 and increase by one per appended entry. An entry is
/// durable only once a `flush` covering it has returned.
///
/// A failed flush may have left any prefix of the buffer in the store, so
/// the log cannot tell which LSNs are taken. It drops the buffer and
/// answers every later write with [`Error::LogFailed`]; reopening over the
/// same store rescans it and resumes after the last persisted LSN.
pub struct WriteAheadLog {
    store: Box<dyn LogStore>,
    buffer: Vec<LogEntry>,
    next_lsn: Lsn,
    last_checkpoint: Lsn,
    config: WalConfig,
    failed: Option<String>,
}

impl WriteAheadLog {
    /// Open a log over `store`, scanning existing records.
    ///
    /// # Errors
    /// `CorruptLogEntry` if any existing record is malformed.
    pub fn open(store: impl LogStore + 'static, config: WalConfig) -> Result<Self> {
        config.validate()?;
        let mut store: Box<dyn LogStore> = Box::new(store);
        let entries = LogEntry::decode_all(&store.read_all()?)?;

        let last_lsn = entries.iter().map(|e| e.lsn).max().unwrap_or_default();
        let last_checkpoint = entries
            .iter()
            .filter(|e| e.entry_type == LogEntryType::Checkpoint)
            .map(|e| e.lsn)
            .max()
            .unwrap_or_default();

        info!(
            entries = entries.len(),
            %last_lsn,
            %last_checkpoint,
            "write-ahead log opened"
        );
        Ok(Self {
            store,
            buffer: Vec::with_capacity(config.buffer_entries),
            next_lsn: last_lsn.next(),
            last_checkpoint,
            config,
            failed: None,
        })
    }

    /// Assign the next LSN to `entry` and buffer it.
    ///
    /// Flushes once the buffer holds `buffer_entries` records.
    pub fn append(&mut self, mut entry: LogEntry) -> Result<Lsn> {
        self.check_usable()?;
        let lsn = self.next_lsn;
        entry.lsn = lsn;
        self.next_lsn = lsn.next();
        self.buffer.push(entry);

        if self.buffer.len() >= self.config.buffer_entries {
            self.flush()?;
        }
        Ok(lsn)
    }

    /// Write every buffered entry and sync the store.
    ///
    /// # Errors
    /// The store's error if writing or syncing fails. The log is unusable
    /// afterwards; see [`WriteAheadLog`].
    pub fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.write_buffer() {
            Ok(bytes) => {
                debug!(entries = self.buffer.len(), bytes, "wal flushed");
                self.buffer.clear();
                Ok(())
            }
            Err(err) => {
                error!(%err, lost = self.buffer.len(), "wal flush failed, log disabled");
                self.failed = Some(err.to_string());
                self.buffer.clear();
                Err(err)
            }
        }
    }

    fn write_buffer(&mut self) -> Result<usize> {
        let mut bytes = Vec::new();
        for entry in &self.buffer {
            bytes.extend_from_slice(entry.encode()?.as_bytes());
            bytes.push(b'\n');
        }
        self.store.append(&bytes)?;
        self.store.sync()?;
        Ok(bytes.len())
    }

    fn check_usable(&self) -> Result<()> {
        match &self.failed {
            Some(reason) => Err(Error::LogFailed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Whether an earlier flush failed.
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    /// Flush, then durably record a CHECKPOINT as the new recovery start.
    pub fn checkpoint(&mut self) -> Result<Lsn> {
        self.flush()?;
        let lsn = self.append(LogEntry::checkpoint())?;
        self.flush()?;
        self.last_checkpoint = lsn;
        info!(%lsn, "checkpoint written");
        Ok(lsn)
    }

    /// Drop every durable entry older than the last checkpoint.
    ///
    /// Returns how many entries were kept.
    pub fn truncate(&mut self) -> Result<usize> {
        self.flush()?;
        let entries = self.read_entries()?;
        let before = entries.len();

        let mut bytes = Vec::new();
        let mut kept = 0;
        for entry in entries.iter().filter(|e| e.lsn >= self.last_checkpoint) {
            bytes.extend_from_slice(entry.encode()?.as_bytes());
            bytes.push(b'\n');
            kept += 1;
        }
        self.store.replace(&bytes)?;

        info!(kept, dropped = before - kept, "wal truncated");
        Ok(kept)
    }

    /// Every entry the store holds, in log order. Buffered entries are
    /// not included.
    pub fn read_entries(&mut self) -> Result<Vec<LogEntry>> {
        LogEntry::decode_all(&self.store.read_all()?)
    }

    /// LSN the next append will receive.
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// LSN of the most recent checkpoint, `Lsn(0)` if none.
    pub fn last_checkpoint(&self) -> Lsn {
        self.last_checkpoint
    }

    /// Entries appended but not yet flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("next_lsn", &self.next_lsn)
            .field("last_checkpoint", &self.last_checkpoint)
            .field("buffered", &self.buffer.len())
            .field("failed", &self.failed)
            .finish()
    }
}
