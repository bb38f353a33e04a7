//! Transaction manager: MVCC reads, two-phase locking, write-ahead logging.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::lock_manager::{LockManager, LockMode};
use super::mvcc::VersionStore;
use super::transaction::{IsolationLevel, Transaction, TxnState};
use crate::common::config::TxnConfig;
use crate::common::{Error, LogicalClock, Lsn, Result, TxnId};
use crate::index::StorageBackend;
use crate::recovery::{LogEntry, RecoveryReport, WriteAheadLog};

/// Transactions and version chains, guarded together.
#[derive(Debug, Default)]
struct TxnTable {
    active: HashMap<TxnId, Transaction>,
    finished: HashMap<TxnId, TxnState>,
    versions: VersionStore,
    next_txn_id: u64,
    /// A committed write failed to reach the backend; only log replay
    /// restores it, so the log must not be cut.
    apply_failed: bool,
}

impl TxnTable {
    fn active(&self, txn_id: TxnId) -> Result<&Transaction> {
        self.active.get(&txn_id).ok_or(Error::TxnNotActive(txn_id))
    }

    fn active_mut(&mut self, txn_id: TxnId) -> Result<&mut Transaction> {
        self.active.get_mut(&txn_id).ok_or(Error::TxnNotActive(txn_id))
    }
}

/// Coordinates transactions over a [`StorageBackend`].
///
/// ```text
///  write ─► X lock ─► WAL (INSERT/UPDATE/DELETE) ─► uncommitted version
///  commit ─► validate ─► WAL COMMIT + flush ─► apply to backend ─► stamp ─► unlock
///  abort ─► strip versions ─► WAL ABORT ─► unlock
/// ```
///
/// The backend only ever holds committed data. Keys no transaction has
/// written yet are read straight from it; the first write to a key seeds
/// its version chain with the backend value as a timestamp-zero base.
///
/// Lock order: transaction table, then WAL, then backend. The lock table is
/// never held while waiting on any of them.
pub struct TransactionManager {
    config: TxnConfig,
    table: Mutex<TxnTable>,
    locks: LockManager,
    wal: Mutex<WriteAheadLog>,
    storage: Arc<dyn StorageBackend>,
    clock: LogicalClock,
    recovery: RecoveryReport,
}

impl TransactionManager {
    /// Recover `storage` from `wal`, then accept transactions.
    ///
    /// # Errors
    /// `CorruptLogEntry` if the log cannot be read; the manager is not built.
    pub fn open(config: TxnConfig, mut wal: WriteAheadLog, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        let recovery = wal.recover(storage.as_ref())?;

        // Never reuse an id already in the log: its records would merge
        let last_txn = wal
            .read_entries()?
            .iter()
            .map(|e| e.txn_id.as_u64())
            .max()
            .unwrap_or(0);

        info!(
            next_txn = last_txn + 1,
            committed = recovery.committed.len(),
            rolled_back = recovery.rolled_back.len(),
            "transaction manager ready"
        );
        Ok(Self {
            locks: LockManager::new(config.lock_wait_timeout),
            config,
            table: Mutex::new(TxnTable {
                next_txn_id: last_txn + 1,
                ..TxnTable::default()
            }),
            wal: Mutex::new(wal),
            storage,
            clock: LogicalClock::new(),
            recovery,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a transaction at `level`.
    pub fn begin(&self, level: IsolationLevel) -> Result<TxnId> {
        let mut table = self.table.lock();
        let txn_id = TxnId(table.next_txn_id);
        self.wal.lock().append(LogEntry::begin(txn_id))?;
        table.next_txn_id += 1;

        let start_time = self.clock.tick();
        table.active.insert(txn_id, Transaction::new(txn_id, level, start_time));
        debug!(txn = %txn_id, %level, %start_time, "begin");
        Ok(txn_id)
    }

    /// Start a transaction at the configured default level.
    pub fn begin_default(&self) -> Result<TxnId> {
        self.begin(self.config.default_isolation)
    }

    /// Make `txn_id`'s writes durable and visible.
    ///
    /// # Errors
    /// - `TxnNotActive` if the transaction is unknown or finished
    /// - `SerializationFailure` if a SERIALIZABLE transaction lost a
    ///   write-write race; it has been aborted
    /// - the log's error if the COMMIT record could not be made durable.
    ///   The transaction is aborted in this process and the log refuses
    ///   further writes; should the record have reached the store anyway,
    ///   recovery after reopening treats the transaction as committed
    /// - the backend's error if applying a write failed. The transaction
    ///   is committed regardless: every other write is still applied and
    ///   recovery replays the missing one from the log
    pub fn commit(&self, txn_id: TxnId) -> Result<()> {
        let mut table = self.table.lock();
        let txn = table.active(txn_id)?;

        if txn.isolation_level == IsolationLevel::Serializable && !Self::validate(&table, txn) {
            warn!(txn = %txn_id, "serialization failure");
            let locked = self.abort_locked(&mut table, txn_id)?;
            drop(table);
            self.release(txn_id, &locked);
            return Err(Error::SerializationFailure(txn_id));
        }

        // Durable before anything becomes visible
        let logged = {
            let mut wal = self.wal.lock();
            wal.append(LogEntry::commit(txn_id)).and_then(|_| wal.flush())
        };
        if let Err(err) = logged {
            return Err(self.fail_locked(table, txn_id, err));
        }

        let commit_ts = self.clock.tick();
        let mut txn = table.active.remove(&txn_id).ok_or(Error::TxnNotActive(txn_id))?;
        let mut applied = Ok(());
        for key in &txn.write_set {
            let Some(value) = table.versions.commit(key, txn_id, commit_ts) else {
                continue;
            };
            let result = match value {
                Some(value) => self.storage.put(key, &value),
                None => self.storage.delete(key),
            };
            if let Err(err) = result {
                error!(txn = %txn_id, key = %hex::encode(key), %err, "committed write not applied");
                table.apply_failed = true;
                if applied.is_ok() {
                    applied = Err(err);
                }
            }
        }
        txn.state = TxnState::Committed;
        table.finished.insert(txn_id, TxnState::Committed);
        drop(table);

        self.release(txn_id, &txn.locks_held.keys().cloned().collect::<Vec<_>>());
        debug!(txn = %txn_id, %commit_ts, writes = txn.write_set.len(), "commit");
        applied
    }

    /// Roll back `txn_id`. Its writes were never visible to other committed
    /// readers, so only the uncommitted versions are dropped.
    pub fn abort(&self, txn_id: TxnId) -> Result<()> {
        let mut table = self.table.lock();
        let locked = self.abort_locked(&mut table, txn_id)?;
        drop(table);
        self.release(txn_id, &locked);
        Ok(())
    }

    /// Abort under the table lock. Returns the keys whose locks to release.
    fn abort_locked(&self, table: &mut TxnTable, txn_id: TxnId) -> Result<Vec<Vec<u8>>> {
        let mut txn = table.active.remove(&txn_id).ok_or(Error::TxnNotActive(txn_id))?;
        for (key, _) in txn.undo_log.iter().rev() {
            table.versions.strip(key, txn_id);
        }
        txn.state = TxnState::Aborted;
        table.finished.insert(txn_id, TxnState::Aborted);

        // The ABORT record is informational; recovery treats a missing one
        // the same way
        if let Err(err) = self.wal.lock().append(LogEntry::abort(txn_id)) {
            warn!(txn = %txn_id, %err, "abort record not logged");
        }
        debug!(txn = %txn_id, undone = txn.undo_log.len(), "abort");
        Ok(txn.locks_held.into_keys().collect())
    }

    /// Abort `txn_id` because its log record could not be written.
    fn fail_locked(&self, mut table: MutexGuard<'_, TxnTable>, txn_id: TxnId, err: Error) -> Error {
        warn!(txn = %txn_id, %err, "log write failed, aborting");
        let locked = self.abort_locked(&mut table, txn_id).unwrap_or_default();
        drop(table);
        self.release(txn_id, &locked);
        err
    }

    /// SERIALIZABLE write-write validation, first committer wins.
    ///
    /// Fails if a still-active transaction that began earlier wrote one of
    /// our keys, or if any other transaction committed one of our keys
    /// after we began.
    fn validate(table: &TxnTable, txn: &Transaction) -> bool {
        let earlier_writer = table.active.values().any(|other| {
            other.txn_id != txn.txn_id
                && other.start_time < txn.start_time
                && !other.write_set.is_disjoint(&txn.write_set)
        });
        let committed_since = txn
            .write_set
            .iter()
            .any(|key| table.versions.committed_after(key, txn.txn_id, txn.start_time));
        !(earlier_writer || committed_since)
    }

    // ========================================================================
    // Data access
    // ========================================================================

    /// Read `key` as `txn_id` sees it.
    pub fn read(&self, txn_id: TxnId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let level = self.table.lock().active(txn_id)?.isolation_level;
        if level == IsolationLevel::Serializable {
            self.lock(txn_id, key, LockMode::Shared)?;
        }

        let mut table = self.table.lock();
        let value = {
            let txn = table.active(txn_id)?;
            match table.versions.visible(key, txn) {
                Some(value) => value.map(<[u8]>::to_vec),
                None => self.storage.get(key)?,
            }
        };
        table.active_mut(txn_id)?.read_set.insert(key.to_vec());
        Ok(value)
    }

    /// Write `value` to `key` inside `txn_id`.
    ///
    /// A log failure aborts the transaction and is returned as is.
    pub fn write(&self, txn_id: TxnId, key: &[u8], value: &[u8]) -> Result<()> {
        self.mutate(txn_id, key, Some(value))
    }

    /// Delete `key` inside `txn_id`.
    pub fn delete(&self, txn_id: TxnId, key: &[u8]) -> Result<()> {
        self.mutate(txn_id, key, None)
    }

    fn mutate(&self, txn_id: TxnId, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.table.lock().active(txn_id)?;
        self.lock(txn_id, key, LockMode::Exclusive)?;

        let mut table = self.table.lock();
        table.active(txn_id)?;

        if !table.versions.has_chain(key) {
            let base = self.storage.get(key)?;
            table.versions.seed(key, base);
        }
        let old = table
            .versions
            .current(key, txn_id)
            .flatten()
            .map(<[u8]>::to_vec);

        let entry = match (value, &old) {
            (Some(value), None) => LogEntry::insert(txn_id, key, value),
            (Some(value), Some(old)) => LogEntry::update(txn_id, key, value, old),
            (None, old) => LogEntry::delete(txn_id, key, old.as_deref()),
        };
        let logged = self.wal.lock().append(entry);
        if let Err(err) = logged {
            return Err(self.fail_locked(table, txn_id, err));
        }

        let now = self.clock.tick();
        table.versions.write(key, txn_id, value.map(<[u8]>::to_vec), now);
        let txn = table.active_mut(txn_id)?;
        txn.undo_log.push((key.to_vec(), old));
        txn.write_set.insert(key.to_vec());
        Ok(())
    }

    /// Take a lock for `txn_id`. A failed request aborts the transaction.
    fn lock(&self, txn_id: TxnId, key: &[u8], mode: LockMode) -> Result<()> {
        match self.locks.acquire(txn_id, key, mode) {
            Ok(()) => {
                let mut table = self.table.lock();
                match table.active_mut(txn_id) {
                    Ok(txn) => {
                        txn.record_lock(key, mode);
                        Ok(())
                    }
                    Err(err) => {
                        // Finished while we waited; give the lock back
                        drop(table);
                        self.locks.release_all(txn_id, [key]);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                let mut table = self.table.lock();
                let mut locked = self.abort_locked(&mut table, txn_id).unwrap_or_default();
                drop(table);
                locked.push(key.to_vec());
                self.release(txn_id, &locked);
                Err(err)
            }
        }
    }

    fn release(&self, txn_id: TxnId, keys: &[Vec<u8>]) {
        self.locks.release_all(txn_id, keys.iter().map(Vec::as_slice));
    }

    // ========================================================================
    // Maintenance & introspection
    // ========================================================================

    /// Persist the backend and write a WAL checkpoint.
    ///
    /// Recovery starts at the latest checkpoint, so one is only written
    /// when the backend can make everything committed before it durable.
    /// Returns `None`, without touching the log, when
    /// - a transaction is active
    /// - the backend is not durable
    /// - a committed write failed to reach the backend since opening
    ///
    /// # Errors
    /// The backend's sync error or the log's error. No checkpoint is
    /// recorded in either case.
    pub fn checkpoint(&self) -> Result<Option<Lsn>> {
        let table = self.table.lock();
        if !table.active.is_empty() {
            debug!(active = table.active.len(), "checkpoint skipped");
            return Ok(None);
        }
        if !self.storage.is_durable() {
            debug!("checkpoint skipped, backend is not durable");
            return Ok(None);
        }
        if table.apply_failed {
            warn!("checkpoint skipped, backend is missing committed writes");
            return Ok(None);
        }

        self.storage.sync()?;
        let lsn = self.wal.lock().checkpoint()?;
        Ok(Some(lsn))
    }

    /// Drop log records older than the last checkpoint. Returns how many
    /// records were kept.
    pub fn truncate_log(&self) -> Result<usize> {
        let _table = self.table.lock();
        self.wal.lock().truncate()
    }

    /// Force buffered log records out.
    pub fn flush_log(&self) -> Result<()> {
        self.wal.lock().flush()
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().active.len()
    }

    /// State of `txn_id`, `None` if never started.
    pub fn state(&self, txn_id: TxnId) -> Option<TxnState> {
        let table = self.table.lock();
        table
            .active
            .get(&txn_id)
            .map(|t| t.state)
            .or_else(|| table.finished.get(&txn_id).copied())
    }

    /// Snapshot of an active transaction.
    pub fn transaction(&self, txn_id: TxnId) -> Option<Transaction> {
        self.table.lock().active.get(&txn_id).cloned()
    }

    /// What recovery did when the manager was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .field("active", &self.active_count())
            .field("wal", &*self.wal.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::common::config::WalConfig;
    use crate::common::PageId;
    use crate::index::{BTreeBackend, PagedBTree};
    use crate::recovery::{LogStore, MemoryLogStore};
    use crate::storage::MemoryPageStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Log store whose sync, once armed, persists the bytes but reports
    /// failure.
    #[derive(Clone, Default)]
    struct SyncFailsOnce {
        inner: MemoryLogStore,
        armed: Arc<AtomicBool>,
    }

    impl LogStore for SyncFailsOnce {
        fn append(&mut self, bytes: &[u8]) -> Result<()> {
            self.inner.append(bytes)
        }

        fn sync(&mut self) -> Result<()> {
            self.inner.sync()?;
            if self.armed.swap(false, Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "sync lost")));
            }
            Ok(())
        }

        fn read_all(&mut self) -> Result<Vec<u8>> {
            self.inner.read_all()
        }

        fn replace(&mut self, bytes: &[u8]) -> Result<()> {
            self.inner.replace(bytes)
        }
    }

    /// Durable-looking backend that refuses to store one key.
    struct RejectsKey {
        inner: BTreeBackend,
        rejected: Vec<u8>,
    }

    impl StorageBackend for RejectsKey {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
            if key == self.rejected.as_slice() {
                return Err(Error::PageStoreUnavailable {
                    page_id: PageId::new(0),
                    reason: "write rejected".into(),
                });
            }
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> Result<()> {
            self.inner.delete(key)
        }

        fn range_scan(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.range_scan(lo, hi)
        }

        fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.scan_prefix(prefix)
        }

        fn is_durable(&self) -> bool {
            true
        }
    }

    fn paged(store: &MemoryPageStore) -> Arc<dyn StorageBackend> {
        let pool = BufferPoolManager::with_capacity(16, store.clone()).unwrap();
        Arc::new(PagedBTree::open(pool, 5).unwrap())
    }

    fn manager() -> (TransactionManager, MemoryLogStore) {
        let store = MemoryLogStore::new();
        let wal = WriteAheadLog::open(store.clone(), WalConfig::default()).unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        let config = TxnConfig::default().lock_wait_timeout(Duration::from_millis(200));
        (TransactionManager::open(config, wal, storage).unwrap(), store)
    }

    #[test]
    fn test_read_own_writes() {
        let (tm, _) = manager();
        let t = tm.begin(IsolationLevel::ReadCommitted).unwrap();
        tm.write(t, b"k", b"v").unwrap();
        assert_eq!(tm.read(t, b"k").unwrap(), Some(b"v".to_vec()));
        tm.delete(t, b"k").unwrap();
        assert_eq!(tm.read(t, b"k").unwrap(), None);
    }

    #[test]
    fn test_commit_applies_to_storage() {
        let (tm, _) = manager();
        let t = tm.begin_default().unwrap();
        tm.write(t, b"k", b"v").unwrap();
        assert_eq!(tm.storage().get(b"k").unwrap(), None);

        tm.commit(t).unwrap();
        assert_eq!(tm.storage().get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(tm.state(t), Some(TxnState::Committed));
        assert_eq!(tm.active_count(), 0);
        assert_eq!(tm.lock_manager().locked_key_count(), 0);
    }

    #[test]
    fn test_abort_discards_writes() {
        let (tm, _) = manager();
        let setup = tm.begin_default().unwrap();
        tm.write(setup, b"k", b"old").unwrap();
        tm.commit(setup).unwrap();

        let t = tm.begin_default().unwrap();
        tm.write(t, b"k", b"new").unwrap();
        tm.abort(t).unwrap();

        let reader = tm.begin_default().unwrap();
        assert_eq!(tm.read(reader, b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(tm.state(t), Some(TxnState::Aborted));
    }

    #[test]
    fn test_finished_txn_rejects_operations() {
        let (tm, _) = manager();
        let t = tm.begin_default().unwrap();
        tm.commit(t).unwrap();

        assert!(matches!(tm.write(t, b"k", b"v"), Err(Error::TxnNotActive(_))));
        assert!(matches!(tm.read(t, b"k"), Err(Error::TxnNotActive(_))));
        assert!(matches!(tm.commit(t), Err(Error::TxnNotActive(_))));
        assert!(matches!(tm.abort(TxnId(999)), Err(Error::TxnNotActive(_))));
        assert_eq!(tm.state(TxnId(999)), None);
    }

    #[test]
    fn test_read_committed_vs_uncommitted() {
        let (tm, _) = manager();
        let writer = tm.begin_default().unwrap();
        tm.write(writer, b"k", b"dirty").unwrap();

        let rc = tm.begin(IsolationLevel::ReadCommitted).unwrap();
        let ru = tm.begin(IsolationLevel::ReadUncommitted).unwrap();
        assert_eq!(tm.read(rc, b"k").unwrap(), None);
        assert_eq!(tm.read(ru, b"k").unwrap(), Some(b"dirty".to_vec()));

        tm.commit(writer).unwrap();
        assert_eq!(tm.read(rc, b"k").unwrap(), Some(b"dirty".to_vec()));
    }

    #[test]
    fn test_repeatable_read_snapshot() {
        let (tm, _) = manager();
        let setup = tm.begin_default().unwrap();
        tm.write(setup, b"k", b"v1").unwrap();
        tm.commit(setup).unwrap();

        let rr = tm.begin(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(tm.read(rr, b"k").unwrap(), Some(b"v1".to_vec()));

        let writer = tm.begin_default().unwrap();
        tm.write(writer, b"k", b"v2").unwrap();
        tm.write(writer, b"new", b"x").unwrap();
        tm.commit(writer).unwrap();

        assert_eq!(tm.read(rr, b"k").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(tm.read(rr, b"new").unwrap(), None);
    }

    #[test]
    fn test_serializable_first_committer_wins() {
        let (tm, _) = manager();
        let a = tm.begin(IsolationLevel::Serializable).unwrap();
        let b = tm.begin(IsolationLevel::Serializable).unwrap();

        tm.write(a, b"k", b"a").unwrap();
        tm.commit(a).unwrap();

        tm.write(b, b"k", b"b").unwrap();
        let err = tm.commit(b).unwrap_err();
        assert!(matches!(err, Error::SerializationFailure(id) if id == b));
        assert!(err.is_retryable());
        assert_eq!(tm.state(b), Some(TxnState::Aborted));
        assert_eq!(tm.storage().get(b"k").unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_lock_timeout_aborts_waiter() {
        let (tm, _) = manager();
        let holder = tm.begin_default().unwrap();
        tm.write(holder, b"k", b"1").unwrap();

        let waiter = tm.begin_default().unwrap();
        let err = tm.write(waiter, b"k", b"2").unwrap_err();
        assert!(matches!(err, Error::LockWaitExceeded { .. }));
        assert_eq!(tm.state(waiter), Some(TxnState::Aborted));

        tm.commit(holder).unwrap();
        assert_eq!(tm.lock_manager().locked_key_count(), 0);
    }

    #[test]
    fn test_commit_is_durable_before_return() {
        let (tm, store) = manager();
        let t = tm.begin_default().unwrap();
        tm.write(t, b"k", b"v").unwrap();
        tm.commit(t).unwrap();

        store.crash();
        assert_eq!(durable_types(&store), vec!["BEGIN", "INSERT", "COMMIT"]);
    }

    fn durable_types(store: &MemoryLogStore) -> Vec<String> {
        String::from_utf8(store.durable_bytes())
            .unwrap()
            .lines()
            .map(|line| LogEntry::decode(line).unwrap())
            .map(|e| format!("{:?}", e.entry_type).to_uppercase())
            .collect()
    }

    #[test]
    fn test_reopen_recovers_and_continues_ids() {
        let store = MemoryLogStore::new();
        let storage: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        {
            let wal = WriteAheadLog::open(store.clone(), WalConfig::default()).unwrap();
            let tm = TransactionManager::open(TxnConfig::default(), wal, Arc::clone(&storage)).unwrap();
            let t = tm.begin_default().unwrap();
            tm.write(t, b"k", b"v").unwrap();
            tm.commit(t).unwrap();
            let loser = tm.begin_default().unwrap();
            tm.write(loser, b"j", b"x").unwrap();
            tm.flush_log().unwrap();
        }

        let fresh: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        let wal = WriteAheadLog::open(store.clone(), WalConfig::default()).unwrap();
        let tm = TransactionManager::open(TxnConfig::default(), wal, Arc::clone(&fresh)).unwrap();

        assert_eq!(fresh.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(fresh.get(b"j").unwrap(), None);
        assert_eq!(tm.recovery_report().rolled_back, vec![TxnId(2)]);
        assert_eq!(tm.begin_default().unwrap(), TxnId(3));
    }

    #[test]
    fn test_checkpoint_skipped_while_active() {
        let store = MemoryLogStore::new();
        let wal = WriteAheadLog::open(store.clone(), WalConfig::default()).unwrap();
        let tm = TransactionManager::open(TxnConfig::default(), wal, paged(&MemoryPageStore::new(512))).unwrap();

        let t = tm.begin_default().unwrap();
        assert_eq!(tm.checkpoint().unwrap(), None);
        tm.commit(t).unwrap();
        assert!(tm.checkpoint().unwrap().is_some());
    }

    #[test]
    fn test_checkpoint_needs_durable_backend() {
        let (tm, store) = manager();
        let t = tm.begin_default().unwrap();
        tm.write(t, b"k", b"v").unwrap();
        tm.commit(t).unwrap();

        assert_eq!(tm.checkpoint().unwrap(), None);
        assert!(!durable_types(&store).contains(&"CHECKPOINT".to_string()));
    }

    #[test]
    fn test_checkpointed_data_outlives_truncated_log() {
        let log = MemoryLogStore::new();
        let pages = MemoryPageStore::new(512);
        {
            let wal = WriteAheadLog::open(log.clone(), WalConfig::default()).unwrap();
            let tm = TransactionManager::open(TxnConfig::default(), wal, paged(&pages)).unwrap();
            let t = tm.begin_default().unwrap();
            tm.write(t, b"k", b"v").unwrap();
            tm.commit(t).unwrap();

            assert!(tm.checkpoint().unwrap().is_some());
            assert_eq!(tm.truncate_log().unwrap(), 1);
        }
        log.crash();

        let wal = WriteAheadLog::open(log.clone(), WalConfig::default()).unwrap();
        let tm = TransactionManager::open(TxnConfig::default(), wal, paged(&pages)).unwrap();
        let reader = tm.begin_default().unwrap();
        assert_eq!(tm.read(reader, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_failed_log_flush_aborts_writer() {
        let log = SyncFailsOnce::default();
        let wal = WriteAheadLog::open(log.clone(), WalConfig { buffer_entries: 2 }).unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        let tm = TransactionManager::open(TxnConfig::default(), wal, storage).unwrap();

        let t = tm.begin_default().unwrap();
        log.armed.store(true, Ordering::SeqCst);
        // The INSERT fills the buffer; its flush reaches the store but fails
        assert!(matches!(tm.write(t, b"ghost", b"boo"), Err(Error::Io(_))));
        assert_eq!(tm.state(t), Some(TxnState::Aborted));
        assert!(matches!(tm.commit(t), Err(Error::TxnNotActive(_))));
        assert!(matches!(tm.begin_default(), Err(Error::LogFailed(_))));
        assert_eq!(tm.lock_manager().locked_key_count(), 0);
        drop(tm);

        let mut wal = WriteAheadLog::open(log.clone(), WalConfig::default()).unwrap();
        let lsns: Vec<u64> = wal.read_entries().unwrap().iter().map(|e| e.lsn.0).collect();
        assert_eq!(lsns, vec![1, 2]);

        let fresh: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        let tm = TransactionManager::open(TxnConfig::default(), wal, Arc::clone(&fresh)).unwrap();
        assert_eq!(fresh.get(b"ghost").unwrap(), None);
        assert_eq!(tm.recovery_report().rolled_back, vec![t]);
    }

    #[test]
    fn test_commit_applies_every_write_despite_backend_error() {
        let log = MemoryLogStore::new();
        let rejecting = Arc::new(RejectsKey {
            inner: BTreeBackend::new(5).unwrap(),
            rejected: b"b".to_vec(),
        });
        let wal = WriteAheadLog::open(log.clone(), WalConfig::default()).unwrap();
        let tm = TransactionManager::open(TxnConfig::default(), wal, rejecting.clone()).unwrap();

        let t = tm.begin_default().unwrap();
        for key in [b"a", b"b", b"c"] {
            tm.write(t, key, b"v").unwrap();
        }
        assert!(matches!(tm.commit(t), Err(Error::PageStoreUnavailable { .. })));
        assert_eq!(tm.state(t), Some(TxnState::Committed));
        assert_eq!(rejecting.get(b"a").unwrap(), Some(b"v".to_vec()));
        assert_eq!(rejecting.get(b"c").unwrap(), Some(b"v".to_vec()));
        assert_eq!(rejecting.get(b"b").unwrap(), None);
        assert_eq!(tm.lock_manager().locked_key_count(), 0);

        // The log is the only copy of "b": keep it
        assert_eq!(tm.checkpoint().unwrap(), None);
        drop(tm);

        let fresh: Arc<dyn StorageBackend> = Arc::new(BTreeBackend::new(5).unwrap());
        let wal = WriteAheadLog::open(log, WalConfig::default()).unwrap();
        TransactionManager::open(TxnConfig::default(), wal, Arc::clone(&fresh)).unwrap();
        for key in [b"a", b"b", b"c"] {
            assert_eq!(fresh.get(key).unwrap(), Some(b"v".to_vec()));
        }
    }
}
