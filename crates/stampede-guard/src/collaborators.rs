//! Interfaces to the systems the protection layer sits between.
//!
//! The cache, the repository and the lock manager are external services in
//! production (Redis, a database, a SETNX-style lock). Only their contracts
//! live here; [`memory`](crate::memory) has in-process implementations.

use crate::error::{CacheError, LockError, RepositoryError};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Bounds a value must meet to be cached and coalesced.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A record as returned by the repository. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: String,
    pub value: String,
    pub created_at: SystemTime,
}

impl DataRecord {
    /// Creates a record stamped with the current time.
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            created_at: SystemTime::now(),
        }
    }
}

/// Whether a cached value is still within its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Live, with this much time left.
    Fresh(Duration),
    /// Past its TTL but still held by the cache.
    Stale,
}

/// A cached value and its freshness, read together in one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: Vec<u8>,
    pub freshness: Freshness,
}

impl CachedValue {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// The cache store. Individual operations are atomic; the protection layer
/// adds no locking of its own around them.
pub trait CacheClient: Send + Sync + 'static {
    /// Returns the value if present and within its TTL.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;

    /// Stores `value` with a logical TTL of `ttl`.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Returns the value and its freshness in a single read, including
    /// values whose TTL has passed but that the store still holds.
    fn get_with_ttl<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CachedValue>, CacheError>>;

    /// Removes the key.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>>;
}

/// The slow backing store being protected.
pub trait DataRepository<T>: Send + Sync + 'static {
    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<T, RepositoryError>>;
}

/// A held distributed lock.
pub trait Lock: Send + Sync {
    fn key(&self) -> &str;

    /// Token identifying this owner; release only deletes the lock if the
    /// stored token still matches.
    fn owner_token(&self) -> &str;

    /// Releases the lock. Releasing twice, or after the lock expired and was
    /// taken by someone else, must leave the other owner's lock intact.
    fn release(&self) -> BoxFuture<'_, Result<(), LockError>>;
}

/// Issues distributed locks with compare-and-swap semantics.
pub trait LockManager: Send + Sync + 'static {
    /// Attempts to take `key` for `ttl`. Returns `Ok(None)` if another owner
    /// holds it.
    fn try_lock<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<Option<Box<dyn Lock>>, LockError>>;
}
