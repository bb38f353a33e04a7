//! Key-level two-phase locking.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use super::wait_for::WaitForGraph;
use crate::common::{Error, Result, TxnId};

/// Lock modes.
///
/// ```text
///             Shared   Exclusive
/// Shared        ok       wait
/// Exclusive    wait      wait
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn compatible(self, other: LockMode) -> bool {
        self == LockMode::Shared && other == LockMode::Shared
    }
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashMap<TxnId, LockMode>,
    /// Blocked requests in arrival order.
    waiters: VecDeque<(TxnId, LockMode)>,
}

impl LockEntry {
    /// Holders that prevent `txn_id` from getting `mode`.
    fn blockers(&self, txn_id: TxnId, mode: LockMode) -> Vec<TxnId> {
        self.holders
            .iter()
            .filter(|&(&holder, &held)| holder != txn_id && !mode.compatible(held))
            .map(|(&holder, _)| holder)
            .collect()
    }

    fn remove_waiter(&mut self, txn_id: TxnId) {
        self.waiters.retain(|&(waiter, _)| waiter != txn_id);
    }

    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<Vec<u8>, LockEntry>,
    wait_for: WaitForGraph,
}

/// Shared/exclusive locks on keys, held until release.
///
/// Locks are re-entrant, and a sole shared holder may upgrade to exclusive.
/// A blocked request waits on a condition variable. Every time it wakes it
/// recomputes its wait-for edges and checks for a cycle through itself; if
/// one exists the request fails with [`Error::Deadlock`] (the requester is
/// the victim). A request still blocked after `wait_timeout` fails with
/// [`Error::LockWaitExceeded`].
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    wait_timeout: Duration,
}

impl LockManager {
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            wait_timeout,
        }
    }

    /// Block until `txn_id` holds `key` in at least `mode`.
    pub fn acquire(&self, txn_id: TxnId, key: &[u8], mode: LockMode) -> Result<()> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut table = self.table.lock();

        loop {
            let LockTable { entries, wait_for } = &mut *table;
            let entry = entries.entry(key.to_vec()).or_default();
            let blockers = entry.blockers(txn_id, mode);

            if blockers.is_empty() {
                let held = entry.holders.entry(txn_id).or_insert(mode);
                if mode == LockMode::Exclusive {
                    *held = LockMode::Exclusive;
                }
                entry.remove_waiter(txn_id);
                wait_for.set_waits(txn_id, []);
                return Ok(());
            }

            wait_for.set_waits(txn_id, blockers.iter().copied());
            if let Some(cycle) = wait_for.find_cycle_from(txn_id) {
                entry.remove_waiter(txn_id);
                wait_for.set_waits(txn_id, []);
                warn!(txn = %txn_id, ?cycle, key = %hex::encode(key), "deadlock detected");
                return Err(Error::Deadlock { txn_id, cycle });
            }

            if Instant::now() >= deadline {
                entry.remove_waiter(txn_id);
                wait_for.set_waits(txn_id, []);
                warn!(txn = %txn_id, key = %hex::encode(key), ?mode, "lock wait timed out");
                return Err(Error::LockWaitExceeded {
                    txn_id,
                    key: hex::encode(key),
                });
            }

            if !entry.waiters.iter().any(|&(waiter, _)| waiter == txn_id) {
                entry.waiters.push_back((txn_id, mode));
                debug!(txn = %txn_id, ?mode, ?blockers, key = %hex::encode(key), "waiting for lock");
            }
            self.released.wait_until(&mut table, deadline);
        }
    }

    /// Release every lock `txn_id` holds on `keys` and wake all waiters.
    pub fn release_all<'a>(&self, txn_id: TxnId, keys: impl IntoIterator<Item = &'a [u8]>) {
        let mut table = self.table.lock();
        for key in keys {
            if let Some(entry) = table.entries.get_mut(key) {
                entry.holders.remove(&txn_id);
                entry.remove_waiter(txn_id);
                if entry.is_unused() {
                    table.entries.remove(key);
                }
            }
        }
        table.wait_for.remove_txn(txn_id);
        drop(table);
        self.released.notify_all();
    }

    /// Current holders of `key`, ascending by transaction.
    pub fn holders(&self, key: &[u8]) -> Vec<(TxnId, LockMode)> {
        let table = self.table.lock();
        let mut holders: Vec<(TxnId, LockMode)> = table
            .entries
            .get(key)
            .map(|e| e.holders.iter().map(|(&t, &m)| (t, m)).collect())
            .unwrap_or_default();
        holders.sort_unstable_by_key(|&(t, _)| t);
        holders
    }

    /// Blocked requests on `key`, in arrival order.
    pub fn waiters(&self, key: &[u8]) -> Vec<(TxnId, LockMode)> {
        let table = self.table.lock();
        table
            .entries
            .get(key)
            .map(|e| e.waiters.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Keys with at least one holder or waiter.
    pub fn locked_key_count(&self) -> usize {
        self.table.lock().entries.len()
    }
}
