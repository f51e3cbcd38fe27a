//! Circuit breaker guarding calls to a slow backing store.
//!
//! The breaker isolates a failing repository so that a cache stampede does
//! not turn into a backend outage: once enough consecutive failures are
//! seen, calls are short-circuited with [`CircuitBreakerError::OpenCircuit`]
//! without touching the backend.
//!
//! ## States
//! - **Closed**: calls pass through; consecutive failures are counted and a
//!   success resets the count.
//! - **Open**: entered when the count reaches `failure_threshold`; every call
//!   is rejected immediately.
//! - **HalfOpen**: entered by the first caller arriving after `timeout` has
//!   elapsed since the last failure. That caller holds the single admission
//!   ticket; everyone else is still rejected until the trial resolves. A
//!   successful trial closes the circuit, a failed one reopens it and
//!   restarts the cooldown.
//!
//! ## Usage
//!
//! ```rust
//! use stampede_guard_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::<std::io::Error>::builder()
//!         .failure_threshold(2)
//!         .timeout(Duration::from_millis(100))
//!         .name("repository")
//!         .build(),
//! );
//!
//! let value = breaker
//!     .call(async { Ok::<_, std::io::Error>("row") })
//!     .await;
//! assert_eq!(value.unwrap(), "row");
//! # }
//! ```
//!
//! Callers that need finer control can take a [`CallPermit`] with
//! [`CircuitBreaker::try_acquire`] and report the outcome themselves. A
//! permit dropped without a report gives its half-open ticket back.
//!
//! ## Feature Flags
//! - `metrics`: call outcome and transition counters via the `metrics` crate
//! - `tracing`: state transitions and rejections via the `tracing` crate

use crate::circuit::{Admission, Circuit};
#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
#[cfg(feature = "metrics")]
use std::sync::Once;
#[cfg(feature = "tracing")]
use tracing::debug;

pub use circuit::{CircuitMetrics, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder, SharedFailureClassifier};
pub use error::CircuitBreakerError;
pub use events::CircuitBreakerEvent;

mod circuit;
mod config;
mod error;
mod events;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// A shareable circuit breaker. Clones observe and drive the same circuit.
pub struct CircuitBreaker<E> {
    circuit: Arc<Mutex<Circuit>>,
    state_atomic: Arc<AtomicU8>,
    config: Arc<CircuitBreakerConfig<E>>,
}

impl<E> CircuitBreaker<E> {
    /// Creates a closed breaker from `config`.
    pub fn new(config: CircuitBreakerConfig<E>) -> Self {
        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "circuitbreaker_calls_total",
                "Total number of calls through the circuit breaker"
            );
            describe_counter!(
                "circuitbreaker_transitions_total",
                "Total number of circuit breaker state transitions"
            );
            describe_gauge!(
                "circuitbreaker_state",
                "Current state of the circuit breaker (0 closed, 1 open, 2 half-open)"
            );
        });

        let state_atomic = Arc::new(AtomicU8::new(CircuitState::Closed as u8));
        Self {
            circuit: Arc::new(Mutex::new(Circuit::new(Arc::clone(&state_atomic)))),
            state_atomic,
            config: Arc::new(config),
        }
    }

    /// Shorthand for `CircuitBreakerConfig::builder()`.
    pub fn builder() -> CircuitBreakerConfigBuilder<E> {
        CircuitBreakerConfig::builder()
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig<E> {
        &self.config
    }

    /// Current state, read without taking the circuit lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Returns true if calls are currently short-circuited.
    ///
    /// An open circuit whose cooldown has elapsed still reports `true` until
    /// a caller claims the half-open trial.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Snapshot of the breaker's counters.
    pub fn metrics(&self) -> CircuitMetrics {
        self.circuit.lock().metrics()
    }

    /// Forces the circuit open, e.g. from an operator command.
    pub fn force_open(&self) {
        self.circuit.lock().force_open(&self.config);
    }

    /// Forces the circuit closed and clears the failure count.
    pub fn force_closed(&self) {
        self.circuit.lock().force_closed(&self.config);
    }

    /// Alias of [`force_closed`](Self::force_closed).
    pub fn reset(&self) {
        self.force_closed();
    }

    /// Asks for permission to call the backend.
    ///
    /// Only the Open to HalfOpen transition mutates the circuit here, and it
    /// does so under the circuit lock, so two concurrent callers can never
    /// both hold the ticket created by one transition.
    pub fn try_acquire(&self) -> Result<CallPermit<E>, CircuitBreakerError<E>> {
        let admission = self.circuit.lock().try_acquire(&self.config);

        #[cfg(feature = "tracing")]
        match admission {
            Admission::Rejected => {
                debug!(breaker = %self.config.name, "circuit breaker rejected call")
            }
            Admission::Trial => {
                debug!(breaker = %self.config.name, "circuit breaker admitted half-open trial")
            }
            Admission::Permitted => {}
        }

        match admission {
            Admission::Rejected => Err(CircuitBreakerError::OpenCircuit),
            Admission::Permitted | Admission::Trial => Ok(CallPermit {
                circuit: Arc::clone(&self.circuit),
                config: Arc::clone(&self.config),
                trial: admission == Admission::Trial,
                settled: false,
            }),
        }
    }

    /// Runs `call` if the breaker admits it and records the outcome.
    ///
    /// Errors the failure classifier rejects are returned as
    /// [`CircuitBreakerError::Inner`] but recorded as successes, since they
    /// say nothing about backend health. If a call timeout is configured and
    /// elapses, the call is dropped and recorded as a failure.
    pub async fn call<T, F>(&self, call: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;

        let result = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    permit.record_failure();
                    return Err(CircuitBreakerError::Timeout(limit));
                }
            },
            None => call.await,
        };

        match result {
            Ok(value) => {
                permit.record_success();
                Ok(value)
            }
            Err(err) => {
                if (self.config.failure_classifier)(&err) {
                    permit.record_failure();
                } else {
                    permit.record_success();
                }
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            circuit: Arc::clone(&self.circuit),
            state_atomic: Arc::clone(&self.state_atomic),
            config: Arc::clone(&self.config),
        }
    }
}

impl<E> std::fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to make one backend call.
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping the permit unreported
/// (for example because the caller was cancelled) records nothing but frees
/// a half-open trial ticket.
#[must_use = "report the call outcome or the half-open ticket is only freed on drop"]
pub struct CallPermit<E> {
    circuit: Arc<Mutex<Circuit>>,
    config: Arc<CircuitBreakerConfig<E>>,
    trial: bool,
    settled: bool,
}

impl<E> CallPermit<E> {
    /// Returns true if this permit is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.circuit.lock().record_success(&self.config, self.trial);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.circuit.lock().record_failure(&self.config, self.trial);
    }
}

impl<E> Drop for CallPermit<E> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.circuit.lock().release_trial();
        }
    }
}
