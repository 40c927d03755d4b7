//! Error types for the blockwatch pipeline.

use thiserror::Error;

/// Errors returned by a [`Repository`](crate::repository::Repository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("block {0} not found")]
    BlockNotFound(i64),

    #[error("contract {0} not found")]
    ContractNotFound(String),

    #[error("invalid block number {0}: must be non-negative")]
    InvalidBlockNumber(i64),

    #[error("invalid contract: {0}")]
    InvalidContract(String),

    /// Backend read/write failure. Not retried internally.
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// Returns `true` for lookups of an absent key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BlockNotFound(_) | Self::ContractNotFound(_))
    }
}

/// Errors returned by a [`BlockSource`](crate::source::BlockSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Connection hiccup, timeout, rate limit: worth retrying.
    #[error("transient source error: {0}")]
    Transient(String),

    /// The node rejected the request or returned garbage.
    #[error("fatal source error: {0}")]
    Fatal(String),

    /// The node does not (yet) have this block.
    #[error("block {0} not available from source")]
    BlockUnavailable(i64),
}

impl SourceError {
    /// Returns `true` if the error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::BlockUnavailable(_))
    }
}

/// Errors surfaced by the header listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// A header could not be resolved to a full block.
    #[error("failed to fetch block {number} after {attempts} attempt(s): {source}")]
    Fetch {
        number: i64,
        attempts: u32,
        #[source]
        source: SourceError,
    },

    #[error("failed to subscribe to headers: {0}")]
    Subscribe(SourceError),

    /// The header stream ended or errored. Terminal for this listener.
    #[error("header subscription terminated: {reason}")]
    SubscriptionTerminated { reason: String },

    #[error("listener already running")]
    AlreadyRunning,
}

impl ListenerError {
    /// Returns `true` if the listener cannot continue after this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fetch { .. })
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub type SourceResult<T> = Result<T, SourceError>;
