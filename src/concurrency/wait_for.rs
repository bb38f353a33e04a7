//! Wait-for graph for deadlock detection.
//!
//! A transaction blocked on a lock gets an edge `waiter -> holder` for
//! every transaction holding an incompatible mode. A cycle is a deadlock.

use std::collections::{HashMap, HashSet};

use crate::common::TxnId;

/// Directed graph of who waits on whom.
///
/// Not synchronized; the lock manager keeps it under its table mutex.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TxnId, HashSet<TxnId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every outgoing edge of `waiter` with edges to `holders`.
    pub fn set_waits(&mut self, waiter: TxnId, holders: impl IntoIterator<Item = TxnId>) {
        let holders: HashSet<TxnId> = holders.into_iter().filter(|&h| h != waiter).collect();
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders);
        }
    }

    /// Drop every edge into or out of `txn_id`.
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        self.edges.retain(|_, holders| {
            holders.remove(&txn_id);
            !holders.is_empty()
        });
    }

    /// A cycle through `start`, as the path `start -> ... -> last`
    /// where `last` waits on `start`.
    pub fn find_cycle_from(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut visited = HashSet::new();
        let mut path = vec![start];
        visited.insert(start);
        self.dfs(start, start, &mut visited, &mut path).then_some(path)
    }

    fn dfs(&self, node: TxnId, start: TxnId, visited: &mut HashSet<TxnId>, path: &mut Vec<TxnId>) -> bool {
        let Some(holders) = self.edges.get(&node) else {
            return false;
        };
        for &holder in holders {
            if holder == start {
                return true;
            }
            if visited.insert(holder) {
                path.push(holder);
                if self.dfs(holder, start, visited, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Transactions `waiter` is blocked on.
    pub fn waits_of(&self, waiter: TxnId) -> Vec<TxnId> {
        let mut holders: Vec<TxnId> = self
            .edges
            .get(&waiter)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        holders.sort_unstable();
        holders
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }
}
