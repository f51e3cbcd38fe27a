//! Listener plumbing shared by the breaker and the protector.
//!
//! Each component defines its own event type and keeps an
//! [`EventListeners`] for it. Listeners run inline on the emitting task and
//! are shielded from each other: one that panics is skipped, not fatal.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// An event a component can report.
pub trait GuardEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable kind, e.g. `"state_transition"`.
    fn event_type(&self) -> &'static str;

    /// Name of the breaker or protector that emitted the event.
    fn source_name(&self) -> &str;
}

/// Receives events of type `E`. Implemented for every
/// `Fn(&E) + Send + Sync` closure.
pub trait EventListener<E: GuardEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    E: GuardEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Listeners for one event type, called in registration order.
pub struct EventListeners<E: GuardEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: GuardEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    source = event.source_name(),
                    event = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: GuardEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: GuardEvent> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}
