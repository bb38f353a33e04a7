//! Error types for tierdb.

use thiserror::Error;

use crate::common::{TxnId, PageId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in tierdb.
///
/// A missing key is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a file-backed page store or log store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The injected page store could not serve a request.
    ///
    /// The buffer pool passes this through untouched.
    #[error("page store unavailable for {page_id}: {reason}")]
    PageStoreUnavailable { page_id: PageId, reason: String },

    /// Buffer pool has no free frames and every cached page is pinned.
    #[error("No free frames available in buffer pool")]
    NoFreeFrames,

    /// Operation needs an unpinned page but the page is in use.
    #[error("{0} is pinned")]
    PagePinned(PageId),

    /// A serialized node does not fit into one page.
    #[error("{page_id} overflow: need {needed} bytes, page holds {capacity}")]
    PageOverflow {
        page_id: PageId,
        needed: usize,
        capacity: usize,
    },

    /// Stored page checksum does not match its contents.
    #[error("checksum mismatch on {0}")]
    ChecksumMismatch(PageId),

    /// A page does not hold what its reader expects.
    #[error("corrupt {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    /// A lock could not be granted within the configured wait bound.
    #[error("{txn_id} gave up waiting for a lock on key {key}")]
    LockWaitExceeded { txn_id: TxnId, key: String },

    /// Granting the lock would close a cycle in the wait-for graph.
    #[error("deadlock detected for {txn_id} (cycle: {cycle:?})")]
    Deadlock { txn_id: TxnId, cycle: Vec<TxnId> },

    /// Commit-time write-write validation failed; the transaction was aborted.
    #[error("serialization failure: {0} was aborted")]
    SerializationFailure(TxnId),

    /// The transaction is unknown or already committed/aborted.
    #[error("{0} is not active")]
    TxnNotActive(TxnId),

    /// A log record could not be decoded. Recovery refuses to continue.
    #[error("corrupt log entry at line {line}: {reason}")]
    CorruptLogEntry { line: usize, reason: String },

    /// An earlier log flush failed. The log refuses further writes until
    /// it is reopened from its store.
    #[error("write-ahead log unusable after failed flush: {0}")]
    LogFailed(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the caller may retry the transaction from `begin`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LockWaitExceeded { .. } | Error::Deadlock { .. } | Error::SerializationFailure(_)
        )
    }
}
