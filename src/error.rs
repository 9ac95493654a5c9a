//! Error types for the ledger
//!
//! Client-caused kinds carry the caller-facing message in their `#[error]`
//! text. Infrastructure kinds (`Storage`, `Serialization`, `Io`, `Config`)
//! wrap the source error and must never be surfaced to callers verbatim.

use crate::types::AccountId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transfer amount is zero or negative
    #[error("transfer amount must be greater than 0")]
    InvalidAmount,

    /// New account requested with a negative initial balance
    #[error("a new account balance should be greater or equal to 0")]
    NegativeBalance,

    /// Service account used as the source of a user transfer
    #[error("the service account cannot be used as a source account")]
    ServiceAccountAsSource,

    /// Source and destination are the same account
    #[error("source account must not be equal to the destination account")]
    SelfTransfer,

    /// Account identifier already present
    #[error("account already exists")]
    AlreadyExists,

    /// Account lookup failed (balance queries)
    #[error("account not found")]
    AccountNotFound,

    /// Transfer source does not exist
    #[error("source account not found")]
    SourceNotFound,

    /// Transfer destination does not exist
    #[error("destination account not found")]
    DestinationNotFound,

    /// Source balance is smaller than the requested amount
    #[error("not enough funds on the source account")]
    InsufficientFunds,

    /// Lost the race for a per-source index; the caller must re-validate
    /// against a fresh snapshot before trying again
    #[error("transfer index {index} for account {account} was taken by a concurrent commit")]
    Conflict {
        /// Source account whose sequence was contended
        account: AccountId,
        /// Index this commit attempted to claim
        index: u64,
    },

    /// Conflict retries exhausted; transient, safe for the caller to retry
    #[error("transfer could not be committed after {0} attempts")]
    RetriesExhausted(u32),

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is the retryable index-race kind
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether the failure was caused by the request itself (4xx-equivalent)
    /// rather than by the service or its storage
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidAmount
                | Error::NegativeBalance
                | Error::ServiceAccountAsSource
                | Error::SelfTransfer
                | Error::AlreadyExists
                | Error::AccountNotFound
                | Error::SourceNotFound
                | Error::DestinationNotFound
                | Error::InsufficientFunds
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
