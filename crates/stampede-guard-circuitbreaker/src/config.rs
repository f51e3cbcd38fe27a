use crate::events::CircuitBreakerEvent;
use crate::CircuitState;
use stampede_guard_core::EventListeners;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether an error counts against backend health.
pub type SharedFailureClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Configuration for a [`CircuitBreaker`](crate::CircuitBreaker).
pub struct CircuitBreakerConfig<E> {
    pub(crate) failure_threshold: usize,
    pub(crate) timeout: Duration,
    pub(crate) permitted_calls_in_half_open: usize,
    pub(crate) call_timeout: Option<Duration>,
    pub(crate) failure_classifier: SharedFailureClassifier<E>,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
    pub(crate) name: String,
}

impl<E> CircuitBreakerConfig<E> {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder<E> {
        CircuitBreakerConfigBuilder::new()
    }

    /// Name used in events, logs and metrics labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consecutive failures that trip the breaker.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Cooldown after the last failure before a half-open trial is admitted.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder<E> {
    failure_threshold: usize,
    timeout: Duration,
    permitted_calls_in_half_open: usize,
    call_timeout: Option<Duration>,
    failure_classifier: SharedFailureClassifier<E>,
    event_listeners: EventListeners<CircuitBreakerEvent>,
    name: String,
}

impl<E> CircuitBreakerConfigBuilder<E> {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            permitted_calls_in_half_open: 1,
            call_timeout: None,
            failure_classifier: Arc::new(|_| true),
            event_listeners: EventListeners::new(),
            name: String::from("<unnamed>"),
        }
    }

    /// Number of consecutive failures in the closed state that open the circuit.
    ///
    /// Values below 1 are treated as 1.
    ///
    /// Default: 5
    pub fn failure_threshold(mut self, n: usize) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// How long the circuit stays open after the last failure before one
    /// trial call is let through.
    ///
    /// Default: 30 seconds
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Number of concurrent trial calls admitted while half-open, and the
    /// number of successful trials needed to close the circuit again.
    ///
    /// Default: 1 (a single admission ticket per transition)
    pub fn permitted_calls_in_half_open(mut self, n: usize) -> Self {
        self.permitted_calls_in_half_open = n.max(1);
        self
    }

    /// Upper bound on a single guarded call made with
    /// [`CircuitBreaker::call`](crate::CircuitBreaker::call). Timeouts count
    /// as failures.
    ///
    /// Default: None
    pub fn call_timeout(mut self, duration: Duration) -> Self {
        self.call_timeout = Some(duration);
        self
    }

    /// Decides which errors count as failures. Errors for which the
    /// classifier returns `false` (for example "record not found") are
    /// passed through and recorded as successes: the backend answered, so
    /// the consecutive-failure count resets and a half-open trial closes.
    ///
    /// Default: every error is a failure
    pub fn failure_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.failure_classifier = Arc::new(classifier);
        self
    }

    /// Give this breaker a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Registers a callback invoked with `(from, to)` on every state change.
    ///
    /// # Example
    /// ```rust
    /// use stampede_guard_circuitbreaker::{CircuitBreakerConfig, CircuitState};
    ///
    /// let config = CircuitBreakerConfig::<std::io::Error>::builder()
    ///     .on_state_transition(|from, to| {
    ///         if to == CircuitState::Open {
    ///             eprintln!("backing store protected ({from:?} -> {to:?})");
    ///         }
    ///     })
    ///     .build();
    /// # let _ = config;
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &CircuitBreakerEvent| {
            if let CircuitBreakerEvent::StateTransition {
                from_state,
                to_state,
                ..
            } = event
            {
                f(*from_state, *to_state);
            }
        });
        self
    }

    /// Registers a callback invoked whenever a call is short-circuited.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event: &CircuitBreakerEvent| {
            if matches!(event, CircuitBreakerEvent::CallRejected { .. }) {
                f();
            }
        });
        self
    }

    /// Registers a listener for every breaker event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(f);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CircuitBreakerConfig<E> {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: self.timeout,
            permitted_calls_in_half_open: self.permitted_calls_in_half_open,
            call_timeout: self.call_timeout,
            failure_classifier: self.failure_classifier,
            event_listeners: self.event_listeners,
            name: self.name,
        }
    }
}

impl<E> Default for CircuitBreakerConfigBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
