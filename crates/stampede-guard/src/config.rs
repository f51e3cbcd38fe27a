use crate::events::{ProtectorEvent, ProtectorEventKind};
use stampede_guard_circuitbreaker::{CircuitBreakerEvent, CircuitState};
use stampede_guard_core::EventListeners;
use std::sync::Arc;
use std::time::Duration;

type CircuitListener = Arc<dyn Fn(&CircuitBreakerEvent) + Send + Sync>;

/// Configuration for a [`Protector`](crate::Protector).
pub struct ProtectorConfig {
    pub(crate) name: String,
    pub(crate) base_ttl: Duration,
    pub(crate) jitter_percent: f64,
    pub(crate) lock_ttl: Duration,
    pub(crate) lock_acquire_timeout: Duration,
    pub(crate) lock_retry_interval: Duration,
    pub(crate) lock_busy_wait: Duration,
    pub(crate) repository_timeout: Duration,
    pub(crate) refresh_timeout: Duration,
    pub(crate) max_concurrent_refreshes: usize,
    pub(crate) failure_threshold: usize,
    pub(crate) breaker_timeout: Duration,
    pub(crate) event_listeners: EventListeners<ProtectorEvent>,
    pub(crate) circuit_listeners: Vec<CircuitListener>,
}

impl ProtectorConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ProtectorConfigBuilder {
        ProtectorConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// TTL applied (before jitter) to values loaded from the repository.
    pub fn base_ttl(&self) -> Duration {
        self.base_ttl
    }

    pub fn jitter_percent(&self) -> f64 {
        self.jitter_percent
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    pub fn repository_timeout(&self) -> Duration {
        self.repository_timeout
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    pub fn max_concurrent_refreshes(&self) -> usize {
        self.max_concurrent_refreshes
    }
}

impl Default for ProtectorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ProtectorConfig`].
pub struct ProtectorConfigBuilder {
    name: String,
    base_ttl: Duration,
    jitter_percent: f64,
    lock_ttl: Duration,
    lock_acquire_timeout: Duration,
    lock_retry_interval: Duration,
    lock_busy_wait: Duration,
    repository_timeout: Duration,
    refresh_timeout: Duration,
    max_concurrent_refreshes: usize,
    failure_threshold: usize,
    breaker_timeout: Duration,
    event_listeners: EventListeners<ProtectorEvent>,
    circuit_listeners: Vec<CircuitListener>,
}

impl ProtectorConfigBuilder {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            base_ttl: Duration::from_secs(300),
            jitter_percent: 0.1,
            lock_ttl: Duration::from_secs(5),
            lock_acquire_timeout: Duration::ZERO,
            lock_retry_interval: Duration::from_millis(10),
            lock_busy_wait: Duration::from_millis(100),
            repository_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
            max_concurrent_refreshes: 16,
            failure_threshold: 5,
            breaker_timeout: Duration::from_secs(30),
            event_listeners: EventListeners::new(),
            circuit_listeners: Vec::new(),
        }
    }

    /// Name used in events, logs and metrics labels. Also names the
    /// protector's circuit breaker and coalescer.
    ///
    /// Default: `<unnamed>`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// TTL for values loaded from the repository, before jitter.
    ///
    /// Default: 5 minutes
    pub fn base_ttl(mut self, ttl: Duration) -> Self {
        self.base_ttl = ttl;
        self
    }

    /// Fraction of the TTL used as the jitter spread, e.g. `0.1` for ±10%.
    ///
    /// Default: 0.1
    pub fn jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent;
        self
    }

    /// How long a load lock lives if its holder never releases it.
    ///
    /// Default: 5 seconds
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// How long to keep retrying a held load lock before falling back.
    /// Zero makes a single attempt.
    ///
    /// Default: 0
    pub fn lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    /// Pause between lock attempts while `lock_acquire_timeout` runs.
    ///
    /// Default: 10 milliseconds
    pub fn lock_retry_interval(mut self, interval: Duration) -> Self {
        self.lock_retry_interval = interval;
        self
    }

    /// How long a caller that lost the lock race waits before re-reading the
    /// cache for the winner's value.
    ///
    /// Default: 100 milliseconds
    pub fn lock_busy_wait(mut self, wait: Duration) -> Self {
        self.lock_busy_wait = wait;
        self
    }

    /// Upper bound on a single repository call. Timeouts count as breaker
    /// failures.
    ///
    /// Default: 5 seconds
    pub fn repository_timeout(mut self, timeout: Duration) -> Self {
        self.repository_timeout = timeout;
        self
    }

    /// Upper bound on a whole background refresh, lock included.
    ///
    /// Default: 10 seconds
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Refreshes allowed to run at once. Further refreshes are skipped, not
    /// queued. Values below 1 are treated as 1.
    ///
    /// Default: 16
    pub fn max_concurrent_refreshes(mut self, n: usize) -> Self {
        self.max_concurrent_refreshes = n.max(1);
        self
    }

    /// Consecutive repository failures that open the circuit breaker.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// How long the breaker stays open before admitting a trial load.
    ///
    /// Default: 30 seconds
    pub fn breaker_timeout(mut self, timeout: Duration) -> Self {
        self.breaker_timeout = timeout;
        self
    }

    /// Registers a listener for every protector event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ProtectorEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(f);
        self
    }

    /// Registers a callback invoked whenever an expired value is served.
    pub fn on_stale_served<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &ProtectorEvent| {
            if event.kind == ProtectorEventKind::StaleServed {
                f(&event.key);
            }
        });
        self
    }

    /// Registers a listener for the protector's circuit breaker events.
    pub fn on_circuit_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.circuit_listeners.push(Arc::new(f));
        self
    }

    /// Registers a callback invoked with `(from, to)` on every breaker state
    /// change.
    pub fn on_circuit_transition<F>(self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_circuit_event(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                f(*from_state, *to_state);
            }
        })
    }

    /// Builds the configuration.
    pub fn build(self) -> ProtectorConfig {
        ProtectorConfig {
            name: self.name,
            base_ttl: self.base_ttl,
            jitter_percent: self.jitter_percent,
            lock_ttl: self.lock_ttl,
            lock_acquire_timeout: self.lock_acquire_timeout,
            lock_retry_interval: self.lock_retry_interval,
            lock_busy_wait: self.lock_busy_wait,
            repository_timeout: self.repository_timeout,
            refresh_timeout: self.refresh_timeout,
            max_concurrent_refreshes: self.max_concurrent_refreshes,
            failure_threshold: self.failure_threshold,
            breaker_timeout: self.breaker_timeout,
            event_listeners: self.event_listeners,
            circuit_listeners: self.circuit_listeners,
        }
    }
}

impl Default for ProtectorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
