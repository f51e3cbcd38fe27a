//! TTL jitter.
//!
//! Keys written together (a cache-warming batch, a deploy) would otherwise
//! all expire in the same instant and stampede the backend together.

use rand::Rng;
use std::time::Duration;

/// Returns `base_ttl` moved by a uniformly random offset in
/// `[-jitter_percent * base_ttl, +jitter_percent * base_ttl]`.
///
/// A non-positive (or NaN) `jitter_percent` returns `base_ttl` unchanged.
/// Percentages above `1.0` are clamped to `1.0`, so the result is never
/// negative, and results past [`Duration::MAX`] saturate.
///
/// ```rust
/// use stampede_guard::add_jitter;
/// use std::time::Duration;
///
/// let ttl = add_jitter(Duration::from_secs(10), 0.2);
/// assert!(ttl >= Duration::from_secs(8) && ttl <= Duration::from_secs(12));
/// assert_eq!(add_jitter(Duration::from_secs(10), 0.0), Duration::from_secs(10));
/// ```
pub fn add_jitter(base_ttl: Duration, jitter_percent: f64) -> Duration {
    if jitter_percent.is_nan() || jitter_percent <= 0.0 || base_ttl.is_zero() {
        return base_ttl;
    }

    let base = base_ttl.as_secs_f64();
    let spread = base * jitter_percent.min(1.0);
    let offset = rand::rng().random_range(-spread..=spread);
    // Near Duration::MAX the sum is no longer representable.
    Duration::try_from_secs_f64((base + offset).max(0.0)).unwrap_or(Duration::MAX)
}
