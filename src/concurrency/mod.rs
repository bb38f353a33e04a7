//! Transactions: MVCC isolation with two-phase locking.
//!
//! - [`TransactionManager`] - begin/read/write/delete/commit/abort
//! - [`LockManager`] - Shared/exclusive key locks with deadlock detection
//! - [`WaitForGraph`] - Who waits on whom
//! - [`VersionStore`] - Per-key version chains

mod lock_manager;
mod mvcc;
mod transaction;
mod transaction_manager;
mod wait_for;

pub use lock_manager::{LockManager, LockMode};
pub use mvcc::{Version, VersionStore};
pub use transaction::{IsolationLevel, Transaction, TxnState};
pub use transaction_manager::TransactionManager;
pub use wait_for::WaitForGraph;
