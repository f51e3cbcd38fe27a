//! In-process collaborators.
//!
//! Useful for tests, local development and single-node deployments. Each
//! type implements the corresponding trait from
//! [`collaborators`](crate::collaborators) with the same atomicity the
//! protection layer expects from the real systems.

use crate::collaborators::{CacheClient, CachedValue, DataRepository, Freshness, Lock, LockManager};
use crate::error::{CacheError, LockError, RepositoryError};
use crate::lock::deadline_after;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Entry with a logical expiry (`expires_at`) and a physical one
/// (`evict_at`). Between the two the entry is stale but still readable
/// through [`CacheClient::get_with_ttl`].
#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    evict_at: Instant,
}

impl Entry {
    fn freshness(&self, now: Instant) -> Freshness {
        if now < self.expires_at {
            Freshness::Fresh(self.expires_at - now)
        } else {
            Freshness::Stale
        }
    }
}

/// A map-backed cache that keeps expired entries for a grace period so they
/// can be served stale.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    stale_retention: Duration,
}

impl InMemoryCache {
    /// Creates a cache that retains expired entries for five minutes.
    pub fn new() -> Self {
        Self::with_stale_retention(Duration::from_secs(300))
    }

    /// Creates a cache that retains expired entries for `stale_retention`.
    pub fn with_stale_retention(stale_retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stale_retention,
        }
    }

    /// Entries currently held, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Rewrites the logical TTL of an existing entry. Returns false if the
    /// key is absent.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(entry) => {
                let now = Instant::now();
                entry.expires_at = deadline_after(now, ttl);
                entry.evict_at = deadline_after(entry.expires_at, self.stale_retention);
                true
            }
            None => false,
        }
    }

    /// Reads the live entry for `key`, evicting it if past retention.
    fn lookup(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if now < entry.evict_at => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| now >= e.evict_at) {
            entries.remove(key);
        }
        None
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheClient for InMemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        Box::pin(async move {
            Ok(self
                .lookup(key)
                .filter(|entry| matches!(entry.freshness(Instant::now()), Freshness::Fresh(_)))
                .map(|entry| entry.value))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let expires_at = deadline_after(Instant::now(), ttl);
            let entry = Entry {
                value,
                expires_at,
                evict_at: deadline_after(expires_at, self.stale_retention),
            };
            self.entries.write().insert(key.to_string(), entry);
            Ok(())
        })
    }

    fn get_with_ttl<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CachedValue>, CacheError>> {
        Box::pin(async move {
            Ok(self.lookup(key).map(|entry| CachedValue {
                freshness: entry.freshness(Instant::now()),
                value: entry.value,
            }))
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries.write().remove(key);
            Ok(())
        })
    }
}

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

type LockTable = Mutex<HashMap<String, Held>>;

/// Lock manager with SETNX-plus-TTL semantics and owner-token
/// compare-and-delete on release.
#[derive(Debug, Default)]
pub struct InMemoryLockManager {
    table: Arc<LockTable>,
    next_token: AtomicU64,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` is held and its TTL has not run out.
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.table
            .lock()
            .get(key)
            .is_some_and(|held| now < held.expires_at)
    }

    fn mint_token(&self) -> String {
        let seq = self.next_token.fetch_add(1, Ordering::Relaxed);
        format!("{:016x}-{seq}", rand::random::<u64>())
    }
}

impl LockManager for InMemoryLockManager {
    fn try_lock<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<Option<Box<dyn Lock>>, LockError>> {
        Box::pin(async move {
            let now = Instant::now();
            let mut table = self.table.lock();
            if table.get(key).is_some_and(|held| now < held.expires_at) {
                return Ok(None);
            }

            let token = self.mint_token();
            table.insert(
                key.to_string(),
                Held {
                    token: token.clone(),
                    expires_at: deadline_after(now, ttl),
                },
            );
            let lock: Box<dyn Lock> = Box::new(MemoryLock {
                key: key.to_string(),
                token,
                table: Arc::clone(&self.table),
            });
            Ok(Some(lock))
        })
    }
}

struct MemoryLock {
    key: String,
    token: String,
    table: Arc<LockTable>,
}

impl Lock for MemoryLock {
    fn key(&self) -> &str {
        &self.key
    }

    fn owner_token(&self) -> &str {
        &self.token
    }

    fn release(&self) -> BoxFuture<'_, Result<(), LockError>> {
        Box::pin(async move {
            let mut table = self.table.lock();
            if table.get(&self.key).is_some_and(|held| held.token == self.token) {
                table.remove(&self.key);
            }
            Ok(())
        })
    }
}

/// Repository backed by a map, with knobs for latency and injected failure.
pub struct InMemoryRepository<T> {
    records: RwLock<HashMap<String, T>>,
    latency: Mutex<Option<Duration>>,
    failure: Mutex<Option<RepositoryError>>,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync + 'static> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            latency: Mutex::new(None),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every lookup sleeps `latency` before reading the map, so updates
    /// made during the sleep are visible to the in-progress lookup.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    pub fn insert(&self, id: impl Into<String>, record: T) {
        self.records.write().insert(id.into(), record);
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        self.records.write().remove(id)
    }

    /// Makes every lookup fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<RepositoryError>) {
        *self.failure.lock() = error;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Lookups attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> DataRepository<T> for InMemoryRepository<T> {
    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<T, RepositoryError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let latency = *self.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            if let Some(err) = self.failure.lock().clone() {
                return Err(err);
            }
            self.records
                .read()
                .get(id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        })
    }
}
