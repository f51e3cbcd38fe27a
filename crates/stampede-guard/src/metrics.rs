//! Protection counters.
//!
//! One [`ProtectionMetrics`] is created per [`Protector`](crate::Protector)
//! and shared by reference with every component that records into it. With
//! the `metrics` feature each increment is also forwarded to the `metrics`
//! facade, labelled with the protector's name.

#[cfg(feature = "metrics")]
use ::metrics::{counter, describe_counter};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// The counters a protector maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    TotalRequests,
    CacheHits,
    CacheMisses,
    SingleFlightHits,
    LockAcquisitions,
    CircuitBreakerTrips,
    StaleReturns,
    BackgroundRefresh,
    RefreshFailures,
    RefreshRejected,
    FallbackLoads,
}

impl Counter {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn metric(self) -> (&'static str, Option<&'static str>) {
        match self {
            Counter::TotalRequests => ("stampede_requests_total", None),
            Counter::CacheHits => ("stampede_cache_lookups_total", Some("hit")),
            Counter::CacheMisses => ("stampede_cache_lookups_total", Some("miss")),
            Counter::SingleFlightHits => ("stampede_single_flight_hits_total", None),
            Counter::LockAcquisitions => ("stampede_lock_acquisitions_total", None),
            Counter::CircuitBreakerTrips => ("stampede_circuit_trips_total", None),
            Counter::StaleReturns => ("stampede_stale_returns_total", None),
            Counter::BackgroundRefresh => ("stampede_refreshes_total", Some("completed")),
            Counter::RefreshFailures => ("stampede_refreshes_total", Some("failed")),
            Counter::RefreshRejected => ("stampede_refreshes_total", Some("rejected")),
            Counter::FallbackLoads => ("stampede_fallback_loads_total", None),
        }
    }
}

/// Monotonic, lock-free protection counters.
#[derive(Debug, Default)]
pub struct ProtectionMetrics {
    name: String,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    single_flight_hits: AtomicU64,
    lock_acquisitions: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    stale_returns: AtomicU64,
    background_refresh: AtomicU64,
    refresh_failures: AtomicU64,
    refresh_rejected: AtomicU64,
    fallback_loads: AtomicU64,
}

impl ProtectionMetrics {
    /// Creates zeroed counters labelled `name` when exported.
    pub fn new(name: impl Into<String>) -> Self {
        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!("stampede_requests_total", "Reads served by the protector");
            describe_counter!(
                "stampede_cache_lookups_total",
                "Cache lookups by result (hit/miss)"
            );
            describe_counter!(
                "stampede_single_flight_hits_total",
                "Reads answered by another caller's in-flight load"
            );
            describe_counter!(
                "stampede_lock_acquisitions_total",
                "Load locks acquired"
            );
            describe_counter!(
                "stampede_circuit_trips_total",
                "Loads rejected by an open circuit breaker"
            );
            describe_counter!(
                "stampede_stale_returns_total",
                "Expired values served to callers"
            );
            describe_counter!(
                "stampede_refreshes_total",
                "Background refreshes by outcome"
            );
            describe_counter!(
                "stampede_fallback_loads_total",
                "Direct repository loads made without the load lock"
            );
        });

        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::TotalRequests => &self.total_requests,
            Counter::CacheHits => &self.cache_hits,
            Counter::CacheMisses => &self.cache_misses,
            Counter::SingleFlightHits => &self.single_flight_hits,
            Counter::LockAcquisitions => &self.lock_acquisitions,
            Counter::CircuitBreakerTrips => &self.circuit_breaker_trips,
            Counter::StaleReturns => &self.stale_returns,
            Counter::BackgroundRefresh => &self.background_refresh,
            Counter::RefreshFailures => &self.refresh_failures,
            Counter::RefreshRejected => &self.refresh_rejected,
            Counter::FallbackLoads => &self.fallback_loads,
        }
    }

    /// Increments `counter` by one.
    pub fn record(&self, counter: Counter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        match counter.metric() {
            (metric, Some(result)) => {
                counter!(metric, "protector" => self.name.clone(), "result" => result).increment(1)
            }
            (metric, None) => counter!(metric, "protector" => self.name.clone()).increment(1),
        }
    }

    /// Current value of `counter`.
    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Acquire)
    }

    /// Reads every counter. Each value is read atomically; the set as a
    /// whole is not a transaction.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.get(Counter::TotalRequests),
            cache_hits: self.get(Counter::CacheHits),
            cache_misses: self.get(Counter::CacheMisses),
            single_flight_hits: self.get(Counter::SingleFlightHits),
            lock_acquisitions: self.get(Counter::LockAcquisitions),
            circuit_breaker_trips: self.get(Counter::CircuitBreakerTrips),
            stale_returns: self.get(Counter::StaleReturns),
            background_refresh: self.get(Counter::BackgroundRefresh),
            refresh_failures: self.get(Counter::RefreshFailures),
            refresh_rejected: self.get(Counter::RefreshRejected),
            fallback_loads: self.get(Counter::FallbackLoads),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub single_flight_hits: u64,
    pub lock_acquisitions: u64,
    pub circuit_breaker_trips: u64,
    pub stale_returns: u64,
    pub background_refresh: u64,
    pub refresh_failures: u64,
    pub refresh_rejected: u64,
    pub fallback_loads: u64,
}

impl MetricsSnapshot {
    /// Fraction of cache lookups that hit, or `0.0` before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}
