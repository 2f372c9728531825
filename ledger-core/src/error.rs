//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Request rejected before touching any lock, limiter or store
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Caller identity could not be resolved (raised by the identity layer, passed through)
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Per-address rate limiter could not grant a token within the caller's deadline
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Sender balance does not cover the transfer amount
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Balance at the moment of the check
        available: i64,
        /// Amount the caller tried to send
        requested: i64,
    },

    /// Deadline expired or call cancelled while waiting on a lock or limiter
    #[error("Cancelled while waiting")]
    Cancelled,

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for store, serialization and other failures the caller cannot act on
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Serialization(_)
                | Error::Config(_)
                | Error::Metrics(_)
                | Error::Io(_)
        )
    }

    /// True for the business-rule rejection of an overdrawing transfer
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, Error::InsufficientBalance { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::Unauthenticated(msg) => tonic::Status::unauthenticated(msg),
            Error::RateLimited => tonic::Status::resource_exhausted("rate limit exceeded"),
            Error::InsufficientBalance { .. } => {
                tonic::Status::failed_precondition("insufficient balance")
            }
            Error::Cancelled => tonic::Status::cancelled("deadline exceeded while waiting"),
            internal => {
                tracing::error!(error = %internal, "Internal ledger error");
                tonic::Status::internal("internal ledger error")
            }
        }
    }
}
