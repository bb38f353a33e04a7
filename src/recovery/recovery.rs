//! Crash recovery from the write-ahead log.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::log_entry::{LogEntry, LogEntryType};
use super::wal::WriteAheadLog;
use crate::common::{Lsn, Result, TxnId};
use crate::index::StorageBackend;

/// What a recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Checkpoint the scan started from.
    pub start_lsn: Lsn,
    /// Entries read at or after `start_lsn`.
    pub entries_scanned: usize,
    /// Transactions with a COMMIT record, ascending.
    pub committed: Vec<TxnId>,
    /// Transactions without one, ascending.
    pub rolled_back: Vec<TxnId>,
    /// Mutations re-applied.
    pub redone: usize,
    /// Mutations reverted.
    pub undone: usize,
}

impl WriteAheadLog {
    /// Rebuild `storage` from the durable log.
    ///
    /// Scans from the last checkpoint. A transaction is committed iff its
    /// COMMIT record is in the scanned range.
    ///
    /// 1. REDO, in log order: committed INSERT and UPDATE put the new value,
    ///    committed DELETE removes the key.
    /// 2. UNDO, in reverse log order, for every other transaction except
    ///    the system one: restore the old value if logged, otherwise remove
    ///    the key of an INSERT. An entry followed by a committed write to the
    ///    same key is left alone, since that write already determines the key.
    ///
    /// # Errors
    /// `CorruptLogEntry` on any malformed record; nothing is applied then.
    pub fn recover(&mut self, storage: &dyn StorageBackend) -> Result<RecoveryReport> {
        let start_lsn = self.last_checkpoint();
        let entries: Vec<LogEntry> = self
            .read_entries()?
            .into_iter()
            .filter(|e| e.lsn >= start_lsn)
            .collect();

        let committed: HashSet<TxnId> = entries
            .iter()
            .filter(|e| e.entry_type == LogEntryType::Commit)
            .map(|e| e.txn_id)
            .collect();

        let mut report = RecoveryReport {
            start_lsn,
            entries_scanned: entries.len(),
            ..RecoveryReport::default()
        };

        // REDO
        let mut last_committed_write: HashMap<&[u8], Lsn> = HashMap::new();
        for entry in entries.iter().filter(|e| committed.contains(&e.txn_id)) {
            let Some(key) = mutation_key(entry) else {
                continue;
            };
            match (entry.entry_type, &entry.value) {
                (LogEntryType::Delete, _) => storage.delete(key)?,
                (_, Some(value)) => storage.put(key, value)?,
                (_, None) => continue,
            }
            last_committed_write.insert(key, entry.lsn);
            report.redone += 1;
        }

        // UNDO
        let mut losers: HashSet<TxnId> = HashSet::new();
        for entry in entries.iter().rev() {
            if committed.contains(&entry.txn_id) || entry.txn_id.is_system() {
                continue;
            }
            losers.insert(entry.txn_id);

            let Some(key) = mutation_key(entry) else {
                continue;
            };
            if last_committed_write.get(key).is_some_and(|&lsn| lsn > entry.lsn) {
                debug!(txn = %entry.txn_id, lsn = %entry.lsn, "undo superseded by committed write");
                continue;
            }
            match (&entry.old_value, entry.entry_type) {
                (Some(old), _) => storage.put(key, old)?,
                (None, LogEntryType::Insert) => storage.delete(key)?,
                (None, _) => continue,
            }
            report.undone += 1;
        }

        report.committed = sorted(committed);
        report.rolled_back = sorted(losers);
        info!(
            start = %report.start_lsn,
            scanned = report.entries_scanned,
            committed = report.committed.len(),
            rolled_back = report.rolled_back.len(),
            redone = report.redone,
            undone = report.undone,
            "recovery complete"
        );
        Ok(report)
    }
}

fn mutation_key(entry: &LogEntry) -> Option<&[u8]> {
    entry
        .entry_type
        .is_mutation()
        .then_some(entry.key.as_deref())
        .flatten()
}

fn sorted(txns: HashSet<TxnId>) -> Vec<TxnId> {
    let mut txns: Vec<TxnId> = txns.into_iter().collect();
    txns.sort_unstable();
    txns
}
