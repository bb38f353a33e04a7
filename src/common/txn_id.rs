//! Transaction and log identifiers.

use std::fmt;

/// Identifies a transaction.
///
/// Ids are minted by the transaction manager starting at 1. Id 0 is reserved
/// for system records such as checkpoints and the committed base version of
/// a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

impl TxnId {
    /// The system pseudo-transaction.
    pub const SYSTEM: TxnId = TxnId(0);

    /// Create a new TxnId.
    #[inline]
    pub fn new(id: u64) -> Self {
        TxnId(id)
    }

    /// Raw numeric value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the system pseudo-transaction.
    #[inline]
    pub fn is_system(self) -> bool {
        self == Self::SYSTEM
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn({})", self.0)
    }
}

/// Log sequence number: position of an entry in the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Create a new Lsn.
    #[inline]
    pub fn new(lsn: u64) -> Self {
        Lsn(lsn)
    }

    /// The LSN following this one.
    #[inline]
    pub fn next(self) -> Self {
        Lsn(self.0 + 1)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({})", self.0)
    }
}
