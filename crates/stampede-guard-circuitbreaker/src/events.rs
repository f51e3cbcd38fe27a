use crate::CircuitState;
use stampede_guard_core::GuardEvent;
use std::time::Instant;

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The breaker moved between states.
    StateTransition {
        breaker_name: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A call was admitted. `trial` is set for half-open probes.
    CallPermitted {
        breaker_name: String,
        timestamp: Instant,
        state: CircuitState,
        trial: bool,
    },
    /// A call was short-circuited.
    CallRejected {
        breaker_name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    SuccessRecorded {
        breaker_name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    FailureRecorded {
        breaker_name: String,
        timestamp: Instant,
        state: CircuitState,
        failure_count: usize,
    },
}

impl GuardEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
        }
    }

    fn source_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { breaker_name, .. }
            | CircuitBreakerEvent::CallPermitted { breaker_name, .. }
            | CircuitBreakerEvent::CallRejected { breaker_name, .. }
            | CircuitBreakerEvent::SuccessRecorded { breaker_name, .. }
            | CircuitBreakerEvent::FailureRecorded { breaker_name, .. } => breaker_name,
        }
    }
}
