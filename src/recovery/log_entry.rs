//! Write-ahead log records.
//!
//! One record per line, as a JSON object with hex-encoded byte fields:
//!
//! ```text
//! {"type":"INSERT","txn_id":1,"table":null,"key":"6b31","value":"61","old_value":null,"lsn":2,"timestamp":1700000000000000}
//! ```

use std::io;

use serde::{Deserialize, Serialize};

use crate::common::clock::wall_clock_micros;
use crate::common::{Error, Lsn, Result, TxnId};

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEntryType {
    Begin,
    Commit,
    Abort,
    Insert,
    Update,
    Delete,
    Checkpoint,
}

impl LogEntryType {
    /// Whether the record describes a change to a key.
    pub fn is_mutation(self) -> bool {
        matches!(self, LogEntryType::Insert | LogEntryType::Update | LogEntryType::Delete)
    }
}

/// A single log record.
///
/// The LSN is assigned by [`WriteAheadLog::append`](super::WriteAheadLog::append);
/// until then it is `Lsn(0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub lsn: Lsn,
    pub entry_type: LogEntryType,
    pub txn_id: TxnId,
    pub table: Option<String>,
    pub key: Option<Vec<u8>>,
    /// New value for INSERT and UPDATE.
    pub value: Option<Vec<u8>>,
    /// Value before the change, used by UNDO.
    pub old_value: Option<Vec<u8>>,
    /// Wall-clock microseconds at creation. Informational only.
    pub timestamp: u64,
}

/// On-disk shape of a [`LogEntry`].
#[derive(Serialize, Deserialize)]
struct Record {
    #[serde(rename = "type")]
    entry_type: LogEntryType,
    txn_id: u64,
    table: Option<String>,
    key: Option<String>,
    value: Option<String>,
    old_value: Option<String>,
    lsn: u64,
    timestamp: u64,
}

impl LogEntry {
    fn new(entry_type: LogEntryType, txn_id: TxnId) -> Self {
        Self {
            lsn: Lsn::default(),
            entry_type,
            txn_id,
            table: None,
            key: None,
            value: None,
            old_value: None,
            timestamp: wall_clock_micros(),
        }
    }

    pub fn begin(txn_id: TxnId) -> Self {
        Self::new(LogEntryType::Begin, txn_id)
    }

    pub fn commit(txn_id: TxnId) -> Self {
        Self::new(LogEntryType::Commit, txn_id)
    }

    pub fn abort(txn_id: TxnId) -> Self {
        Self::new(LogEntryType::Abort, txn_id)
    }

    pub fn checkpoint() -> Self {
        Self::new(LogEntryType::Checkpoint, TxnId::SYSTEM)
    }

    pub fn insert(txn_id: TxnId, key: &[u8], value: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            value: Some(value.to_vec()),
            ..Self::new(LogEntryType::Insert, txn_id)
        }
    }

    pub fn update(txn_id: TxnId, key: &[u8], value: &[u8], old_value: &[u8]) -> Self {
        Self {
            key: Some(key.to_vec()),
            value: Some(value.to_vec()),
            old_value: Some(old_value.to_vec()),
            ..Self::new(LogEntryType::Update, txn_id)
        }
    }

    pub fn delete(txn_id: TxnId, key: &[u8], old_value: Option<&[u8]>) -> Self {
        Self {
            key: Some(key.to_vec()),
            old_value: old_value.map(<[u8]>::to_vec),
            ..Self::new(LogEntryType::Delete, txn_id)
        }
    }

    /// Tag the record with a table name.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Serialize as one JSON line, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        let record = Record {
            entry_type: self.entry_type,
            txn_id: self.txn_id.as_u64(),
            table: self.table.clone(),
            key: self.key.as_ref().map(hex::encode),
            value: self.value.as_ref().map(hex::encode),
            old_value: self.old_value.as_ref().map(hex::encode),
            lsn: self.lsn.0,
            timestamp: self.timestamp,
        };
        serde_json::to_string(&record).map_err(|e| Error::Io(io::Error::from(e)))
    }

    /// Parse one line produced by [`encode`](Self::encode).
    pub fn decode(line: &str) -> Result<Self> {
        Self::parse(line).map_err(|reason| Error::CorruptLogEntry { line: 1, reason })
    }

    /// Parse a whole log, one record per non-blank line.
    pub(crate) fn decode_all(bytes: &[u8]) -> Result<Vec<Self>> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::CorruptLogEntry {
            line: 1 + bytes[..e.valid_up_to()].iter().filter(|&&b| b == b'\n').count(),
            reason: "invalid utf-8".into(),
        })?;

        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = Self::parse(line).map_err(|reason| Error::CorruptLogEntry { line: i + 1, reason })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn parse(line: &str) -> std::result::Result<Self, String> {
        let record: Record = serde_json::from_str(line).map_err(|e| e.to_string())?;
        let unhex = |field: &str, value: Option<String>| {
            value
                .map(hex::decode)
                .transpose()
                .map_err(|e| format!("{}: {}", field, e))
        };

        let entry = Self {
            lsn: Lsn(record.lsn),
            entry_type: record.entry_type,
            txn_id: TxnId(record.txn_id),
            table: record.table,
            key: unhex("key", record.key)?,
            value: unhex("value", record.value)?,
            old_value: unhex("old_value", record.old_value)?,
            timestamp: record.timestamp,
        };

        if entry.entry_type.is_mutation() && entry.key.is_none() {
            return Err(format!("{:?} without a key", entry.entry_type));
        }
        if matches!(entry.entry_type, LogEntryType::Insert | LogEntryType::Update) && entry.value.is_none() {
            return Err(format!("{:?} without a value", entry.entry_type));
        }
        Ok(entry)
    }
}
