//! The protection orchestrator.

use crate::collaborators::{CacheClient, DataRepository, Freshness, LockManager, Record};
use crate::config::ProtectorConfig;
use crate::error::{RepositoryError, StampedeError};
use crate::events::{ProtectorEvent, ProtectorEventKind};
use crate::jitter::add_jitter;
use crate::lock::LockWrapper;
use crate::metrics::{Counter, MetricsSnapshot, ProtectionMetrics};
use crate::refresh::{Refresher, Submission};
use stampede_guard_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
use stampede_guard_coalesce::{CoalesceConfig, CoalesceError, Coalescer};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

/// Prefix of the lock taken by a background refresh, distinct from the load
/// lock on the bare key.
const REFRESH_LOCK_PREFIX: &str = "refresh:";

/// Cache-stampede protection in front of a [`DataRepository`].
///
/// Cheap to clone; clones share the same coalescer, breaker, refresh pool
/// and counters.
///
/// # Example
///
/// ```rust
/// use stampede_guard::{
///     DataRecord, InMemoryCache, InMemoryLockManager, InMemoryRepository, Protector,
///     ProtectorConfig,
/// };
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), stampede_guard::StampedeError> {
/// let repository = Arc::new(InMemoryRepository::new());
/// repository.insert("user:1", DataRecord::new("user:1", "alice"));
///
/// let protector: Protector<DataRecord> = Protector::new(
///     Arc::new(InMemoryCache::new()),
///     repository,
///     Arc::new(InMemoryLockManager::new()),
///     ProtectorConfig::builder().name("users").build(),
/// );
///
/// let record: DataRecord = protector.get("user:1").await?;
/// assert_eq!(record.value, "alice");
/// # Ok(())
/// # }
/// ```
pub struct Protector<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    config: ProtectorConfig,
    cache: Arc<dyn CacheClient>,
    repository: Arc<dyn DataRepository<T>>,
    locks: LockWrapper,
    breaker: CircuitBreaker<RepositoryError>,
    coalescer: Coalescer<String, T, StampedeError>,
    refresher: Refresher,
    metrics: Arc<ProtectionMetrics>,
}

/// How a background refresh ended when it did not fail.
enum Revalidation {
    Refreshed,
    /// Another owner holds the refresh lock, or the value was already fresh.
    Skipped,
}

impl<T: Record> Protector<T> {
    /// Creates a protector over the given collaborators.
    pub fn new(
        cache: Arc<dyn CacheClient>,
        repository: Arc<dyn DataRepository<T>>,
        lock_manager: Arc<dyn LockManager>,
        config: ProtectorConfig,
    ) -> Self {
        let mut breaker_config = CircuitBreakerConfig::<RepositoryError>::builder()
            .name(config.name.clone())
            .failure_threshold(config.failure_threshold)
            .timeout(config.breaker_timeout)
            .call_timeout(config.repository_timeout)
            .failure_classifier(|err: &RepositoryError| !err.is_not_found());
        for listener in &config.circuit_listeners {
            let listener = Arc::clone(listener);
            breaker_config = breaker_config.on_event(move |event| listener(event));
        }

        let inner = Inner {
            locks: LockWrapper::new(lock_manager, config.lock_retry_interval),
            breaker: CircuitBreaker::new(breaker_config.build()),
            coalescer: Coalescer::with_config(
                CoalesceConfig::builder().name(config.name.clone()).build(),
            ),
            refresher: Refresher::new(config.max_concurrent_refreshes),
            metrics: Arc::new(ProtectionMetrics::new(config.name.clone())),
            cache,
            repository,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Reads `key`, loading it from the repository on a miss.
    ///
    /// Concurrent misses for the same key share one load. The loader takes
    /// the key's distributed lock; a caller that loses the lock race waits
    /// briefly for the winner's value, then serves a stale value if one is
    /// held, and only then loads directly.
    pub async fn get(&self, key: &str) -> Result<T, StampedeError> {
        self.inner.metrics.record(Counter::TotalRequests);
        self.inner.read_through(key).await
    }

    /// Writes `value` under `key` with a jittered `ttl`. Last writer wins.
    pub async fn set(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StampedeError> {
        let ttl = add_jitter(ttl, self.inner.config.jitter_percent);
        self.inner.write(key, value, ttl).await
    }

    /// Reads `key`, serving an expired value immediately if one is held.
    ///
    /// Serving a stale value schedules at most one background refresh per
    /// key in this process; across processes the `refresh:` lock keeps it to
    /// one. With nothing cached this behaves like [`get`](Self::get).
    pub async fn get_stale_while_revalidate(&self, key: &str) -> Result<T, StampedeError> {
        let inner = &self.inner;
        inner.metrics.record(Counter::TotalRequests);

        match inner.read_with_ttl(key).await {
            Some((value, Freshness::Fresh(_))) => {
                inner.record(key, Counter::CacheHits, ProtectorEventKind::CacheHit);
                Ok(value)
            }
            Some((value, Freshness::Stale)) => {
                inner.record(key, Counter::StaleReturns, ProtectorEventKind::StaleServed);
                inner.schedule_refresh(key);
                Ok(value)
            }
            None => inner.read_through(key).await,
        }
    }

    /// Removes `key` from the cache. The next read reloads it.
    pub async fn invalidate(&self, key: &str) -> Result<(), StampedeError> {
        self.inner.cache.delete(key).await?;

        #[cfg(feature = "tracing")]
        debug!(protector = %self.inner.config.name, key, "invalidated");
        Ok(())
    }

    /// Snapshot of the protection counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Current state of the circuit breaker guarding the repository.
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// The breaker guarding the repository, e.g. for operator overrides.
    pub fn circuit_breaker(&self) -> &CircuitBreaker<RepositoryError> {
        &self.inner.breaker
    }

    /// Background refreshes currently running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.inner.refresher.in_flight()
    }

    pub fn config(&self) -> &ProtectorConfig {
        &self.inner.config
    }
}

impl<T: Record> Inner<T> {
    fn record(&self, key: &str, counter: Counter, kind: ProtectorEventKind) {
        self.metrics.record(counter);
        self.emit(key, kind);
    }

    fn emit(&self, key: &str, kind: ProtectorEventKind) {
        if !self.config.event_listeners.is_empty() {
            self.config
                .event_listeners
                .emit(&ProtectorEvent::new(&self.config.name, key, kind));
        }
    }

    /// Cache check, then a coalesced protected load on a miss. Does not
    /// count the request; callers do.
    async fn read_through(self: &Arc<Self>, key: &str) -> Result<T, StampedeError> {
        if let Some(value) = self.read_fresh(key).await {
            #[cfg(feature = "tracing")]
            debug!(protector = %self.config.name, key, "cache hit");

            self.record(key, Counter::CacheHits, ProtectorEventKind::CacheHit);
            return Ok(value);
        }
        self.record(key, Counter::CacheMisses, ProtectorEventKind::CacheMiss);

        let inner = Arc::clone(self);
        let owned_key = key.to_string();
        let coalesced = self
            .coalescer
            .run(key.to_string(), move || async move {
                inner.load_with_protection(&owned_key).await
            })
            .await;

        if coalesced.shared {
            self.record(key, Counter::SingleFlightHits, ProtectorEventKind::Coalesced);
        }
        coalesced.result.map_err(|err| match err {
            CoalesceError::Loader(err) => err,
            CoalesceError::LoaderPanicked(message) => StampedeError::LoadPanicked {
                key: key.to_string(),
                message,
            },
            CoalesceError::FlightAborted => StampedeError::LoadAborted {
                key: key.to_string(),
            },
        })
    }

    /// Leader side of a coalesced load.
    async fn load_with_protection(&self, key: &str) -> Result<T, StampedeError> {
        let acquired = self
            .locks
            .acquire(key, self.config.lock_ttl, self.config.lock_acquire_timeout)
            .await;

        match acquired {
            Ok(guard) => {
                self.record(key, Counter::LockAcquisitions, ProtectorEventKind::LockAcquired);

                let result = self.load_locked(key).await;
                if let Err(_err) = guard.release().await {
                    #[cfg(feature = "tracing")]
                    warn!(protector = %self.config.name, key, error = %_err, "lock release failed");
                }
                result
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                debug!(protector = %self.config.name, key, reason = %_err, "load lock busy, falling back");

                self.emit(key, ProtectorEventKind::LockBusy);
                self.load_contended(key).await
            }
        }
    }

    /// Load path while holding the key's lock.
    async fn load_locked(&self, key: &str) -> Result<T, StampedeError> {
        // Another process may have filled the cache while we waited for the lock.
        if let Some(value) = self.read_fresh(key).await {
            return Ok(value);
        }

        let value = self.load_from_repository(key).await?;
        self.store(key, &value).await;
        Ok(value)
    }

    /// Fallback chain for a caller that could not take the lock.
    async fn load_contended(&self, key: &str) -> Result<T, StampedeError> {
        tokio::time::sleep(self.config.lock_busy_wait).await;

        match self.read_with_ttl(key).await {
            Some((value, Freshness::Fresh(_))) => return Ok(value),
            Some((value, Freshness::Stale)) => {
                self.record(key, Counter::StaleReturns, ProtectorEventKind::StaleServed);
                return Ok(value);
            }
            None => {}
        }

        // Nothing to serve. Under pathological contention this duplicates
        // the lock holder's load; the breaker still bounds the damage.
        #[cfg(feature = "tracing")]
        debug!(protector = %self.config.name, key, "direct load without lock");

        self.record(key, Counter::FallbackLoads, ProtectorEventKind::FallbackLoad);
        let value = self.load_from_repository(key).await?;
        self.store(key, &value).await;
        Ok(value)
    }

    /// Breaker-guarded repository call.
    async fn load_from_repository(&self, key: &str) -> Result<T, StampedeError> {
        match self.breaker.call(self.repository.get_by_id(key)).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::OpenCircuit) => {
                #[cfg(feature = "tracing")]
                debug!(protector = %self.config.name, key, "circuit open, load rejected");

                self.record(
                    key,
                    Counter::CircuitBreakerTrips,
                    ProtectorEventKind::CircuitTripped,
                );
                Err(StampedeError::CircuitOpen {
                    key: key.to_string(),
                })
            }
            Err(CircuitBreakerError::Timeout(timeout)) => Err(StampedeError::RepositoryTimeout {
                key: key.to_string(),
                timeout,
            }),
            Err(CircuitBreakerError::Inner(RepositoryError::NotFound)) => {
                Err(StampedeError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(CircuitBreakerError::Inner(source)) => Err(StampedeError::Repository {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Fresh cached value. Cache failures and undecodable entries read as a
    /// miss.
    async fn read_fresh(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(bytes)) => self.decode(key, &bytes),
            Ok(None) => None,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(protector = %self.config.name, key, error = %_err, "cache read failed");
                None
            }
        }
    }

    /// Cached value with its freshness, stale values included.
    async fn read_with_ttl(&self, key: &str) -> Option<(T, Freshness)> {
        match self.cache.get_with_ttl(key).await {
            Ok(Some(cached)) => self
                .decode(key, &cached.value)
                .map(|value| (value, cached.freshness)),
            Ok(None) => None,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(protector = %self.config.name, key, error = %_err, "cache read failed");
                None
            }
        }
    }

    #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
    fn decode(&self, key: &str, bytes: &[u8]) -> Option<T> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Some(value),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                warn!(protector = %self.config.name, key, error = %_err, "undecodable cache entry");
                None
            }
        }
    }

    async fn write(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StampedeError> {
        let bytes = serde_json::to_vec(value).map_err(|err| StampedeError::Codec {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        self.cache.set(key, bytes, ttl).await?;
        Ok(())
    }

    /// Caches a freshly loaded value. The value is already in hand, so a
    /// failed write is logged rather than failing the read.
    async fn store(&self, key: &str, value: &T) {
        let ttl = add_jitter(self.config.base_ttl, self.config.jitter_percent);
        if let Err(_err) = self.write(key, value, ttl).await {
            #[cfg(feature = "tracing")]
            warn!(protector = %self.config.name, key, error = %_err, "cache write failed");
        }
    }

    fn schedule_refresh(self: &Arc<Self>, key: &str) {
        let inner = Arc::clone(self);
        let owned_key = key.to_string();
        let submitted = self
            .refresher
            .submit(key, async move { inner.refresh(&owned_key).await });

        match submitted {
            Submission::Spawned => {
                #[cfg(feature = "tracing")]
                debug!(protector = %self.config.name, key, "background refresh scheduled");
            }
            Submission::AlreadyPending => {}
            Submission::PoolExhausted => {
                #[cfg(feature = "tracing")]
                warn!(protector = %self.config.name, key, "refresh pool saturated, refresh skipped");

                self.record(key, Counter::RefreshRejected, ProtectorEventKind::RefreshRejected);
            }
        }
    }

    /// Body of a background refresh, bounded by `refresh_timeout`.
    async fn refresh(&self, key: &str) {
        let started = Instant::now();
        let timeout = self.config.refresh_timeout;

        let error = match tokio::time::timeout(timeout, self.revalidate(key)).await {
            Ok(Ok(Revalidation::Refreshed)) => {
                let duration = started.elapsed();

                #[cfg(feature = "tracing")]
                info!(protector = %self.config.name, key, ?duration, "background refresh completed");

                self.record(
                    key,
                    Counter::BackgroundRefresh,
                    ProtectorEventKind::RefreshCompleted { duration },
                );
                return;
            }
            Ok(Ok(Revalidation::Skipped)) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("refresh timed out after {timeout:?}"),
        };

        #[cfg(feature = "tracing")]
        warn!(protector = %self.config.name, key, %error, "background refresh failed");

        self.record(
            key,
            Counter::RefreshFailures,
            ProtectorEventKind::RefreshFailed { error },
        );
    }

    /// Reloads `key` under the refresh lock unless someone else is already
    /// doing it or already did.
    async fn revalidate(&self, key: &str) -> Result<Revalidation, StampedeError> {
        let lock_key = format!("{REFRESH_LOCK_PREFIX}{key}");
        let guard = match self
            .locks
            .try_acquire(&lock_key, self.config.refresh_timeout)
            .await
        {
            Ok(guard) => guard,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                debug!(protector = %self.config.name, key, reason = %_err, "refresh lock not taken, skipping");
                return Ok(Revalidation::Skipped);
            }
        };

        let result = self.reload(key).await;
        if let Err(_err) = guard.release().await {
            #[cfg(feature = "tracing")]
            warn!(protector = %self.config.name, key, error = %_err, "refresh lock release failed");
        }
        result
    }

    async fn reload(&self, key: &str) -> Result<Revalidation, StampedeError> {
        if let Some((_, Freshness::Fresh(_))) = self.read_with_ttl(key).await {
            return Ok(Revalidation::Skipped);
        }

        let value = self.load_from_repository(key).await?;
        let ttl = add_jitter(self.config.base_ttl, self.config.jitter_percent);
        self.write(key, &value, ttl).await?;
        Ok(Revalidation::Refreshed)
    }
}

impl<T> Clone for Protector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Protector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protector")
            .field("name", &self.inner.config.name)
            .field("circuit_state", &self.inner.breaker.state())
            .field("metrics", &self.inner.metrics.snapshot())
            .finish()
    }
}
