//! tierdb - An embedded storage and transaction core.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            tierdb                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)               │   │
//! │  │   TransactionManager + MVCC versions + 2PL LockManager   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                 ↓ log first              ↓ apply on commit      │
//! │  ┌──────────────────────────┐  ┌──────────────────────────┐    │
//! │  │   Recovery (recovery/)   │  │  Storage Backend (index/) │    │
//! │  │ WriteAheadLog + REDO/UNDO│  │  B-tree | LSM | Hybrid    │    │
//! │  └──────────────────────────┘  └──────────────────────────┘    │
//! │                                          ↓ page mode            │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Buffer Pool (buffer/)                       │   │
//! │  │      BufferPoolManager + LRU replacer + Statistics       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │   PageStore (DiskManager | MemoryPageStore) + FreeList   │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, TxnId, Error, config, clock)
//! - [`storage`] - Page stores, page formats and the page free list
//! - [`buffer`] - Buffer pool management
//! - [`index`] - Key-value storage backends
//! - [`recovery`] - Write-ahead logging and crash recovery
//! - [`concurrency`] - Transaction management and MVCC
//!
//! # Quick Start
//! ```
//! use std::sync::Arc;
//!
//! use tierdb::common::config::{BackendKind, StorageConfig, TxnConfig, WalConfig};
//! use tierdb::concurrency::{IsolationLevel, TransactionManager};
//! use tierdb::index::{Backend, StorageBackend};
//! use tierdb::recovery::{MemoryLogStore, WriteAheadLog};
//!
//! let storage: Arc<dyn StorageBackend> =
//!     Arc::new(Backend::from_config(&StorageConfig::new(BackendKind::Hybrid)).unwrap());
//! let wal = WriteAheadLog::open(MemoryLogStore::new(), WalConfig::default()).unwrap();
//! let tm = TransactionManager::open(TxnConfig::default(), wal, storage).unwrap();
//!
//! let txn = tm.begin(IsolationLevel::Serializable).unwrap();
//! tm.write(txn, b"account:1", b"1000").unwrap();
//! tm.commit(txn).unwrap();
//!
//! let reader = tm.begin_default().unwrap();
//! assert_eq!(tm.read(reader, b"account:1").unwrap(), Some(b"1000".to_vec()));
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod index;
pub mod recovery;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{Error, FrameId, Lsn, PageId, Result, TxnId};

pub use buffer::{BufferPoolManager, BufferPoolStats, StatsSnapshot};
pub use concurrency::{IsolationLevel, TransactionManager};
pub use index::{Backend, PagedBTree, StorageBackend};
pub use recovery::WriteAheadLog;
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{DiskManager, FreeList, MemoryPageStore, PageStore};
