//! Common types and utilities shared across tierdb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration structs and defaults
//! - Error types
//! - Identifiers (PageId, FrameId, TxnId, Lsn)
//! - The logical clock used for MVCC timestamps

pub mod clock;
pub mod config;
pub mod error;
mod frame_id;
mod page_id;
mod txn_id;

pub use clock::{LogicalClock, Timestamp};
pub use error::{Error, Result};
pub use frame_id::FrameId;
pub use page_id::PageId;
pub use txn_id::{Lsn, TxnId};
