//! Error types for the protection layer and its collaborators.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`CacheClient`](crate::CacheClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// The cache rejected or failed the operation.
    #[error("cache operation failed: {0}")]
    Backend(String),
}

/// Errors reported by a [`DataRepository`](crate::DataRepository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// No record exists for the requested id. Terminal; never retried.
    #[error("record not found")]
    NotFound,
    /// The repository could not be reached.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    /// The query itself failed.
    #[error("repository query failed: {0}")]
    Query(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound)
    }
}

/// Errors reported by a [`LockManager`](crate::LockManager) or the
/// [`LockWrapper`](crate::LockWrapper).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Another owner holds the lock. Absorbed by the fallback chain.
    #[error("lock {key} is held by another owner")]
    NotAcquired { key: String },
    /// The lock backend failed.
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Errors surfaced to callers of [`Protector`](crate::Protector).
///
/// Cache misses and lock contention never appear here: they are handled by
/// the load path and its fallback chain. Only exhaustion reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StampedeError {
    /// The circuit breaker is protecting the backing store and no cached
    /// value was available.
    #[error("circuit open for {key}; backing store is protected")]
    CircuitOpen { key: String },

    /// The repository has no record for the key.
    #[error("record {key} not found")]
    NotFound { key: String },

    /// The repository failed.
    #[error("repository failed loading {key}: {source}")]
    Repository {
        key: String,
        #[source]
        source: RepositoryError,
    },

    /// The repository did not answer within the configured deadline.
    #[error("repository call for {key} timed out after {timeout:?}")]
    RepositoryTimeout { key: String, timeout: Duration },

    /// A cache write requested by the caller failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A value could not be encoded for the cache.
    #[error("failed to encode value for {key}: {message}")]
    Codec { key: String, message: String },

    /// The coalesced load panicked. The panic was contained and reported to
    /// every caller waiting on the load.
    #[error("load for {key} panicked: {message}")]
    LoadPanicked { key: String, message: String },

    /// The coalesced load was torn down before it produced a result.
    #[error("load for {key} was aborted")]
    LoadAborted { key: String },
}

impl StampedeError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, StampedeError::CircuitOpen { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StampedeError::NotFound { .. })
    }
}
