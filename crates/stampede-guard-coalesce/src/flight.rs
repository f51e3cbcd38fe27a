//! Single-flight table and the coalescer built on it.

use crate::{CoalesceConfig, CoalesceError};
use futures::FutureExt;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};

#[cfg(feature = "tracing")]
use tracing::debug;

type FlightResult<V, E> = Result<V, CoalesceError<E>>;

/// What a caller of [`Coalescer::run`] gets back.
#[derive(Debug, Clone)]
pub struct Coalesced<V, E> {
    /// The flight's result, identical for every caller of the flight.
    pub result: FlightResult<V, E>,
    /// False only for the caller whose call started the flight.
    pub shared: bool,
}

impl<V, E> Coalesced<V, E> {
    /// Drops the `shared` flag.
    pub fn into_result(self) -> FlightResult<V, E> {
        self.result
    }
}

/// Live flights keyed by request key.
struct InFlight<K, V, E> {
    flights: Mutex<HashMap<K, broadcast::Sender<FlightResult<V, E>>>>,
}

impl<K, V, E> InFlight<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Joins the live flight for `key`, or registers a new one.
    ///
    /// Returns the receiver and whether the caller became the leader.
    fn join_or_lead(&self, key: &K) -> (broadcast::Receiver<FlightResult<V, E>>, bool) {
        let mut flights = self.flights.lock();
        if let Some(sender) = flights.get(key) {
            (sender.subscribe(), false)
        } else {
            // One message per flight, so capacity 1 never lags.
            let (tx, rx) = broadcast::channel(1);
            flights.insert(key.clone(), tx);
            (rx, true)
        }
    }

    /// Removes the flight and publishes its result to every subscriber.
    ///
    /// Removal and send happen under the same lock, so a caller either
    /// subscribed before the send or starts a fresh flight.
    fn complete(&self, key: &K, result: FlightResult<V, E>) {
        let mut flights = self.flights.lock();
        if let Some(sender) = flights.remove(key) {
            let _ = sender.send(result);
        }
    }

    /// Removes the flight without a result; subscribers observe a closed channel.
    fn abandon(&self, key: &K) {
        self.flights.lock().remove(key);
    }

    fn len(&self) -> usize {
        self.flights.lock().len()
    }

    fn contains(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }
}

/// Tears the flight down if the task running it dies before completing.
struct FlightGuard<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    in_flight: Arc<InFlight<K, V, E>>,
    key: Option<K>,
}

impl<K, V, E> FlightGuard<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn complete(mut self, result: FlightResult<V, E>) {
        if let Some(key) = self.key.take() {
            self.in_flight.complete(&key, result);
        }
    }
}

impl<K, V, E> Drop for FlightGuard<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight.abandon(&key);
        }
    }
}

/// Deduplicates concurrent loads that share a key.
///
/// The first caller for a cold key starts a flight; callers arriving while
/// it runs subscribe to it. The loader future runs as its own tokio task,
/// so dropping any caller, including the one that started the flight, only
/// stops that caller from waiting. The flight record is removed as soon as
/// the loader resolves; nothing is memoized past that point.
///
/// # Example
///
/// ```rust
/// use stampede_guard_coalesce::Coalescer;
///
/// # async fn example() {
/// let coalescer: Coalescer<String, String, std::io::Error> = Coalescer::new();
/// let out = coalescer
///     .run("user:42".to_string(), || async { Ok("alice".to_string()) })
///     .await;
/// assert_eq!(out.result.unwrap(), "alice");
/// assert!(!out.shared);
/// # }
/// ```
pub struct Coalescer<K, V, E> {
    in_flight: Arc<InFlight<K, V, E>>,
    config: Arc<CoalesceConfig>,
}

impl<K, V, E> Coalescer<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an unnamed coalescer.
    pub fn new() -> Self {
        Self::with_config(CoalesceConfig::default())
    }

    /// Creates a coalescer from `config`.
    pub fn with_config(config: CoalesceConfig) -> Self {
        #[cfg(feature = "metrics")]
        describe_counter!(
            "coalesce_requests_total",
            "Total number of loads routed through the coalescer"
        );

        Self {
            in_flight: Arc::new(InFlight::new()),
            config: Arc::new(config),
        }
    }

    /// Runs `loader` for `key` unless a flight for `key` is already live,
    /// in which case the live flight's result is awaited instead.
    ///
    /// `loader` is only invoked by the caller that starts the flight.
    pub async fn run<F, Fut>(&self, key: K, loader: F) -> Coalesced<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        #[cfg(any(feature = "metrics", feature = "tracing"))]
        let name = self.config.name.as_deref().unwrap_or("<unnamed>");

        let (mut receiver, leader) = self.in_flight.join_or_lead(&key);

        if leader {
            #[cfg(feature = "metrics")]
            counter!("coalesce_requests_total", "coalesce" => name.to_string(), "role" => "leader")
                .increment(1);

            #[cfg(feature = "tracing")]
            debug!(coalesce = %name, "load executing as leader");

            let guard = FlightGuard {
                in_flight: Arc::clone(&self.in_flight),
                key: Some(key),
            };
            // Building the future can panic too; waiters see the same error
            // either way.
            match panic::catch_unwind(AssertUnwindSafe(loader)) {
                Ok(load) => {
                    tokio::spawn(async move {
                        let result = match AssertUnwindSafe(load).catch_unwind().await {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => Err(CoalesceError::Loader(err)),
                            Err(payload) => {
                                Err(CoalesceError::LoaderPanicked(panic_message(&*payload)))
                            }
                        };
                        guard.complete(result);
                    });
                }
                Err(payload) => {
                    guard.complete(Err(CoalesceError::LoaderPanicked(panic_message(&*payload))));
                }
            }
        } else {
            #[cfg(feature = "metrics")]
            counter!("coalesce_requests_total", "coalesce" => name.to_string(), "role" => "waiter")
                .increment(1);

            #[cfg(feature = "tracing")]
            debug!(coalesce = %name, "load coalesced as waiter");
        }

        let result = match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err(CoalesceError::FlightAborted),
        };

        Coalesced {
            result,
            shared: !leader,
        }
    }

    /// Number of keys with a live flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns true if a flight for `key` is live.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains(key)
    }
}

impl<K, V, E> Default for Coalescer<K, V, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Clone for Coalescer<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            in_flight: Arc::clone(&self.in_flight),
            config: Arc::clone(&self.config),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
