use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed = 0,
    /// Calls are rejected without reaching the backend.
    Open = 1,
    /// A limited number of trial calls probe the backend.
    HalfOpen = 2,
}

impl CircuitState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker's internals.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    /// Consecutive failures recorded while closed.
    pub failure_count: usize,
    /// Half-open trial calls currently running.
    pub trials_in_flight: usize,
    pub time_since_last_failure: Option<Duration>,
    pub time_since_state_change: Duration,
}

/// Outcome of asking the circuit for permission to call the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Rejected,
    Permitted,
    /// Admitted as a half-open probe; its outcome decides the next state.
    Trial,
}

pub(crate) struct Circuit {
    state: CircuitState,
    state_atomic: Arc<AtomicU8>,
    failure_count: usize,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    trials_in_flight: usize,
    trial_successes: usize,
}

impl Circuit {
    pub(crate) fn new(state_atomic: Arc<AtomicU8>) -> Self {
        state_atomic.store(CircuitState::Closed as u8, Ordering::Release);
        Self {
            state: CircuitState::Closed,
            state_atomic,
            failure_count: 0,
            last_failure_time: None,
            last_state_change: Instant::now(),
            trials_in_flight: 0,
            trial_successes: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state,
            failure_count: self.failure_count,
            trials_in_flight: self.trials_in_flight,
            time_since_last_failure: self.last_failure_time.map(|t| t.elapsed()),
            time_since_state_change: self.last_state_change.elapsed(),
        }
    }

    /// Decides whether a call may proceed.
    ///
    /// The Open to HalfOpen transition happens here, under the caller's lock,
    /// so exactly one caller receives the trial ticket it creates.
    pub(crate) fn try_acquire<E>(&mut self, config: &CircuitBreakerConfig<E>) -> Admission {
        let admission = match self.state {
            CircuitState::Closed => Admission::Permitted,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure_time
                    .map(|t| t.elapsed() > config.timeout)
                    .unwrap_or(true);
                if cooled_down {
                    self.transition_to(CircuitState::HalfOpen, config);
                    self.trials_in_flight = 1;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.trials_in_flight + self.trial_successes < config.permitted_calls_in_half_open
                {
                    self.trials_in_flight += 1;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
        };

        let timestamp = Instant::now();
        match admission {
            Admission::Rejected => {
                config.event_listeners.emit(&CircuitBreakerEvent::CallRejected {
                    breaker_name: config.name.clone(),
                    timestamp,
                    state: self.state,
                });

                #[cfg(feature = "metrics")]
                counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "rejected").increment(1);
            }
            Admission::Permitted | Admission::Trial => {
                config.event_listeners.emit(&CircuitBreakerEvent::CallPermitted {
                    breaker_name: config.name.clone(),
                    timestamp,
                    state: self.state,
                    trial: admission == Admission::Trial,
                });
            }
        }

        admission
    }

    pub(crate) fn record_success<E>(&mut self, config: &CircuitBreakerConfig<E>, trial: bool) {
        config.event_listeners.emit(&CircuitBreakerEvent::SuccessRecorded {
            breaker_name: config.name.clone(),
            timestamp: Instant::now(),
            state: self.state,
        });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "success").increment(1);

        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
                self.trial_successes += 1;
                if self.trial_successes >= config.permitted_calls_in_half_open {
                    self.transition_to(CircuitState::Closed, config);
                }
            }
            // Late results of calls admitted before the circuit opened do not
            // decide anything.
            _ => {}
        }
    }

    pub(crate) fn record_failure<E>(&mut self, config: &CircuitBreakerConfig<E>, trial: bool) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                self.last_failure_time = Some(Instant::now());
            }
            CircuitState::HalfOpen if trial => {
                self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
            }
            _ => {}
        }

        config.event_listeners.emit(&CircuitBreakerEvent::FailureRecorded {
            breaker_name: config.name.clone(),
            timestamp: Instant::now(),
            state: self.state,
            failure_count: self.failure_count,
        });

        #[cfg(feature = "metrics")]
        counter!("circuitbreaker_calls_total", "circuitbreaker" => config.name.clone(), "outcome" => "failure").increment(1);

        match self.state {
            CircuitState::Closed if self.failure_count >= config.failure_threshold => {
                self.transition_to(CircuitState::Open, config);
            }
            CircuitState::HalfOpen if trial => {
                self.transition_to(CircuitState::Open, config);
            }
            _ => {}
        }
    }

    /// Returns a trial ticket whose call never reported an outcome.
    pub(crate) fn release_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }
    }

    pub(crate) fn force_open<E>(&mut self, config: &CircuitBreakerConfig<E>) {
        self.transition_to(CircuitState::Open, config);
    }

    pub(crate) fn force_closed<E>(&mut self, config: &CircuitBreakerConfig<E>) {
        self.transition_to(CircuitState::Closed, config);
    }

    fn transition_to<E>(&mut self, state: CircuitState, config: &CircuitBreakerConfig<E>) {
        if self.state == state {
            return;
        }

        let from_state = self.state;
        let now = Instant::now();

        self.state = state;
        self.state_atomic.store(state as u8, Ordering::Release);
        self.last_state_change = now;
        self.trials_in_flight = 0;
        self.trial_successes = 0;
        match state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => self.last_failure_time = Some(now),
            CircuitState::HalfOpen => {}
        }

        config.event_listeners.emit(&CircuitBreakerEvent::StateTransition {
            breaker_name: config.name.clone(),
            timestamp: now,
            from_state,
            to_state: state,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(breaker = %config.name, from = ?from_state, to = ?state, "circuit state transition");

        #[cfg(feature = "metrics")]
        {
            counter!(
                "circuitbreaker_transitions_total",
                "circuitbreaker" => config.name.clone(),
                "from" => from_state.as_str(),
                "to" => state.as_str()
            )
            .increment(1);
            gauge!("circuitbreaker_state", "circuitbreaker" => config.name.clone())
                .set(state as u8 as f64);
        }
    }
}
