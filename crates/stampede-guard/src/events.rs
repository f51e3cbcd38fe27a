use stampede_guard_core::GuardEvent;
use std::time::{Duration, Instant};

/// What happened to a key inside a [`Protector`](crate::Protector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectorEventKind {
    CacheHit,
    CacheMiss,
    /// The read was answered by another caller's in-flight load.
    Coalesced,
    LockAcquired,
    /// The load lock was held elsewhere; the fallback chain ran.
    LockBusy,
    /// An expired value was served.
    StaleServed,
    /// A repository load was made without holding the load lock.
    FallbackLoad,
    /// A load was rejected because the circuit breaker is open.
    CircuitTripped,
    RefreshCompleted { duration: Duration },
    RefreshFailed { error: String },
    /// The refresh pool was saturated and the refresh was skipped.
    RefreshRejected,
}

/// Event emitted by a protector for a single key.
#[derive(Debug, Clone)]
pub struct ProtectorEvent {
    pub protector_name: String,
    pub timestamp: Instant,
    pub key: String,
    pub kind: ProtectorEventKind,
}

impl ProtectorEvent {
    pub(crate) fn new(protector_name: &str, key: &str, kind: ProtectorEventKind) -> Self {
        Self {
            protector_name: protector_name.to_string(),
            timestamp: Instant::now(),
            key: key.to_string(),
            kind,
        }
    }
}

impl GuardEvent for ProtectorEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            ProtectorEventKind::CacheHit => "cache_hit",
            ProtectorEventKind::CacheMiss => "cache_miss",
            ProtectorEventKind::Coalesced => "coalesced",
            ProtectorEventKind::LockAcquired => "lock_acquired",
            ProtectorEventKind::LockBusy => "lock_busy",
            ProtectorEventKind::StaleServed => "stale_served",
            ProtectorEventKind::FallbackLoad => "fallback_load",
            ProtectorEventKind::CircuitTripped => "circuit_tripped",
            ProtectorEventKind::RefreshCompleted { .. } => "refresh_completed",
            ProtectorEventKind::RefreshFailed { .. } => "refresh_failed",
            ProtectorEventKind::RefreshRejected => "refresh_rejected",
        }
    }

    fn source_name(&self) -> &str {
        &self.protector_name
    }
}
