use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`CircuitBreaker`](crate::CircuitBreaker) calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open (or its half-open trial slot is taken); the
    /// backend was not called.
    #[error("circuit is open; call not permitted")]
    OpenCircuit,

    /// The guarded call did not finish within the configured call timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The guarded call failed.
    #[error("inner call failed: {0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the call was short-circuited by an open breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::OpenCircuit)
    }

    /// Returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<E> for CircuitBreakerError<E> {
    fn from(err: E) -> Self {
        CircuitBreakerError::Inner(err)
    }
}
