//! Core infrastructure for stampede-guard.
//!
//! Every component of the protection layer (circuit breaker, coalescer,
//! protector, background refresher) reports what it does through the
//! event system defined here, so applications can plug alerting or custom
//! telemetry in without the components knowing about each other.

pub mod events;

pub use events::{EventListener, EventListeners, GuardEvent};
