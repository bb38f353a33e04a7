//! Transaction state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::lock_manager::LockMode;
use crate::common::{Timestamp, TxnId};

/// SQL isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Sees any version, committed or not.
    ReadUncommitted,
    /// Sees the latest committed version.
    #[default]
    ReadCommitted,
    /// Sees the latest version committed before it began.
    RepeatableRead,
    /// Repeatable read plus shared read locks and commit-time validation.
    Serializable,
}

impl IsolationLevel {
    /// Whether reads come from the begin-time snapshot.
    pub fn uses_snapshot(self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead | IsolationLevel::Serializable)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadUncommitted => "READ_UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE_READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a transaction. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// A transaction as tracked by the manager.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub txn_id: TxnId,
    pub isolation_level: IsolationLevel,
    pub start_time: Timestamp,
    /// Strongest mode held per key.
    pub locks_held: HashMap<Vec<u8>, LockMode>,
    /// `(key, value before the write)`, in write order.
    pub undo_log: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    pub read_set: HashSet<Vec<u8>>,
    /// Ordered so commit applies keys deterministically.
    pub write_set: BTreeSet<Vec<u8>>,
    pub state: TxnState,
}

impl Transaction {
    pub fn new(txn_id: TxnId, isolation_level: IsolationLevel, start_time: Timestamp) -> Self {
        Self {
            txn_id,
            isolation_level,
            start_time,
            locks_held: HashMap::new(),
            undo_log: Vec::new(),
            read_set: HashSet::new(),
            write_set: BTreeSet::new(),
            state: TxnState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Remember a granted lock, keeping the stronger mode.
    pub(crate) fn record_lock(&mut self, key: &[u8], mode: LockMode) {
        let held = self.locks_held.entry(key.to_vec()).or_insert(mode);
        if mode == LockMode::Exclusive {
            *held = LockMode::Exclusive;
        }
    }
}
