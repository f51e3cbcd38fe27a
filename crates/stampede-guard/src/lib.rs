//! Cache-stampede protection for a slow backing store.
//!
//! When a hot cache entry expires, every reader misses at once and the
//! backing store takes the whole load: a thundering herd. A [`Protector`]
//! sits between readers and the store and composes four defences:
//!
//! - **Request coalescing**: concurrent misses for one key in this process
//!   share a single load ([`stampede_guard_coalesce`]).
//! - **Distributed locking**: across processes, only the holder of a key's
//!   lock loads it; everyone else waits briefly for its result, serves stale
//!   data, and only as a last resort loads directly ([`LockWrapper`]).
//! - **Circuit breaking**: a failing store is cut off after consecutive
//!   failures and probed with a single trial call after a cooldown
//!   ([`stampede_guard_circuitbreaker`]).
//! - **Stale-while-revalidate**: expired values are served immediately while
//!   one background refresh per key reloads them ([`Refresher`]).
//!
//! TTLs written by the protector are jittered ([`add_jitter`]) so keys
//! written together do not expire together.
//!
//! ## Example
//!
//! ```rust
//! use stampede_guard::{
//!     DataRecord, InMemoryCache, InMemoryLockManager, InMemoryRepository, Protector,
//!     ProtectorConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), stampede_guard::StampedeError> {
//! let repository = Arc::new(InMemoryRepository::new());
//! repository.insert("user:1", DataRecord::new("user:1", "alice"));
//!
//! let protector: Protector<DataRecord> = Protector::new(
//!     Arc::new(InMemoryCache::new()),
//!     repository.clone(),
//!     Arc::new(InMemoryLockManager::new()),
//!     ProtectorConfig::builder()
//!         .name("users")
//!         .base_ttl(Duration::from_secs(60))
//!         .jitter_percent(0.1)
//!         .failure_threshold(5)
//!         .build(),
//! );
//!
//! // First read loads from the repository, the second is a cache hit.
//! protector.get("user:1").await?;
//! protector.get("user:1").await?;
//!
//! // Serve whatever is cached, refreshing in the background if it expired.
//! let record = protector.get_stale_while_revalidate("user:1").await?;
//! assert_eq!(record.value, "alice");
//!
//! let metrics = protector.metrics();
//! assert_eq!(metrics.cache_hits, 2);
//! assert_eq!(repository.calls(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! The cache, repository and lock manager are traits ([`CacheClient`],
//! [`DataRepository`], [`LockManager`]). In-process implementations live in
//! [`memory`]; any tower service can serve as the repository through
//! [`ServiceRepository`].
//!
//! ## Feature Flags
//! - `metrics`: export the protection counters, breaker transitions and
//!   coalescing roles through the `metrics` crate
//! - `tracing`: log cache misses, lock contention, breaker transitions and
//!   refresh outcomes via the `tracing` crate

pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod jitter;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod protector;
pub mod refresh;
pub mod service;

pub use collaborators::{
    CacheClient, CachedValue, DataRecord, DataRepository, Freshness, Lock, LockManager, Record,
};
pub use config::{ProtectorConfig, ProtectorConfigBuilder};
pub use error::{CacheError, LockError, RepositoryError, StampedeError};
pub use events::{ProtectorEvent, ProtectorEventKind};
pub use jitter::add_jitter;
pub use lock::{LockGuard, LockWrapper};
pub use memory::{InMemoryCache, InMemoryLockManager, InMemoryRepository};
pub use metrics::{Counter, MetricsSnapshot, ProtectionMetrics};
pub use protector::Protector;
pub use refresh::{Refresher, Submission};
pub use service::ServiceRepository;

pub use stampede_guard_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerEvent, CircuitState,
};
pub use stampede_guard_coalesce::{CoalesceConfig, CoalesceError, Coalesced, Coalescer};
pub use stampede_guard_core::{EventListener, EventListeners, GuardEvent};
