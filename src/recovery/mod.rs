//! Durability: write-ahead logging and crash recovery.
//!
//! - [`LogEntry`] - One JSON-line record
//! - [`LogStore`] - Where the bytes live ([`MemoryLogStore`], [`FileLogStore`])
//! - [`WriteAheadLog`] - LSN assignment, buffering, flush, checkpoint, truncate
//! - [`RecoveryReport`] - Result of [`WriteAheadLog::recover`]

mod log_entry;
mod log_store;
#[allow(clippy::module_inception)]
mod recovery;
mod wal;

pub use log_entry::{LogEntry, LogEntryType};
pub use log_store::{FileLogStore, LogStore, MemoryLogStore};
pub use recovery::RecoveryReport;
pub use wal::WriteAheadLog;
