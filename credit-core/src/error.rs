//! Error types for the credit ledger

use thiserror::Error;

/// Result type for credit ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Credit ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Malformed request, rejected before any mutation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Pack not found
    #[error("Credit pack not found: {0}")]
    PackNotFound(String),

    /// Two packs would share a position
    #[error("Position {0} is already taken")]
    PositionConflict(i64),

    /// Invariant violation (negative balance, position overflow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Pack is more expensive per unit than the caller allows
    #[error("Too Costly: sms cost {sms_cost} exceeds ceiling {ceiling}")]
    TooCostly {
        /// Unit cost of the pack
        sms_cost: u64,
        /// Maximum unit cost accepted by the caller
        ceiling: u64,
    },

    /// Pack holds more credit than the caller allows
    #[error("Too Rich: credit {credit} exceeds ceiling {ceiling}")]
    TooRich {
        /// Remaining balance of the pack
        credit: u64,
        /// Maximum balance accepted by the caller
        ceiling: u64,
    },

    /// Rejection raised by a caller-defined guard
    #[error("Rejected by {guard}: {reason}")]
    Rejected {
        /// Guard name
        guard: String,
        /// Why the guard rejected
        reason: String,
    },

    /// Effect of a guarded execution failed
    #[error("Effect failed: {0}")]
    Effect(String),

    /// Operation cancelled before any mutation was issued
    #[error("Operation cancelled")]
    Cancelled,

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a guard rejection
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::TooCostly { .. } | Error::TooRich { .. } | Error::Rejected { .. }
        )
    }

    /// Whether the error is a backend fault rather than a refused request
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Serialization(_) | Error::Io(_) | Error::Concurrency(_)
        )
    }

    /// Build a rejection for a caller-defined guard
    pub fn rejected(guard: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Rejected {
            guard: guard.into(),
            reason: reason.into(),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Metrics(err.to_string())
    }
}
