//! Request coalescing (single-flight) for cache loads.
//!
//! When a hot cache entry expires, every reader misses at once. This crate
//! makes sure that only one of them actually loads the value: concurrent
//! calls that share a key are folded into a single flight, and every caller
//! receives a clone of its result.
//!
//! # How It Works
//!
//! 1. The first call for a key registers a flight and spawns its loader
//! 2. Calls for the same key arriving meanwhile subscribe to that flight
//! 3. When the loader resolves, the flight is removed and its result
//!    (value, error, or contained panic) is broadcast to every subscriber
//! 4. The next call for the key starts a fresh flight
//!
//! Flights for different keys never block each other.
//!
//! # Requirements
//!
//! - The key type must implement `Hash + Eq + Clone + Send + Sync`
//! - The value and error types must implement `Clone + Send`
//! - The loader future must be `Send + 'static`, since it runs as its own task
//!
//! # Cancellation
//!
//! Dropping a `run` future (for example via `tokio::time::timeout`) stops
//! that caller from waiting and nothing else. The flight keeps running for
//! the remaining subscribers.
//!
//! # Prior Art
//!
//! This pattern is also known as:
//! - **Singleflight** (Go's `golang.org/x/sync/singleflight`)
//! - **Request deduplication**
//! - **Request collapsing**

mod config;
mod error;
mod flight;

pub use config::{CoalesceConfig, CoalesceConfigBuilder};
pub use error::CoalesceError;
pub use flight::{Coalesced, Coalescer};
