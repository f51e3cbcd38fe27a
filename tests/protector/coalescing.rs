//! Concurrent misses for one key share a single repository load.

use super::{Backend, init_tracing};
use futures::future::join_all;
use stampede_guard::ProtectorConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn thousand_concurrent_misses_load_once() {
    let backend = Backend::with_latency(Duration::from_millis(100));
    backend.seed("hot", "value");
    let protector = backend.protector(ProtectorConfig::builder().name("herd").build());

    let callers = 1000;
    let barrier = Arc::new(Barrier::new(callers));
    let mut handles = Vec::with_capacity(callers);
    for _ in 0..callers {
        let protector = protector.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            protector.get("hot").await
        }));
    }

    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.value, "value");
    }

    assert_eq!(backend.repository.calls(), 1);
    let metrics = protector.metrics();
    assert_eq!(metrics.total_requests, 1000);
    assert_eq!(metrics.lock_acquisitions, 1);
    assert!(
        metrics.single_flight_hits >= 999,
        "only {} callers shared the load",
        metrics.single_flight_hits
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_keys_load_independently() {
    init_tracing();
    let backend = Backend::with_latency(Duration::from_millis(50));
    for id in ["a", "b", "c"] {
        backend.seed(id, id);
    }
    let protector = backend.protector(ProtectorConfig::default());

    let reads = (0..10).flat_map(|_| ["a", "b", "c"]).map(|id| {
        let protector = protector.clone();
        async move { (id, protector.get(id).await) }
    });
    for (id, result) in join_all(reads).await {
        assert_eq!(result.unwrap().value, id);
    }

    assert_eq!(backend.repository.calls(), 3);
    assert_eq!(protector.metrics().lock_acquisitions, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_caller_does_not_cancel_shared_load() {
    let backend = Backend::with_latency(Duration::from_millis(100));
    backend.seed("k", "v");
    let protector = backend.protector(ProtectorConfig::default());

    // The first caller starts the load and gives up almost at once.
    let impatient = tokio::time::timeout(Duration::from_millis(10), protector.get("k")).await;
    assert!(impatient.is_err());

    let record = protector.get("k").await.unwrap();
    assert_eq!(record.value, "v");
    assert_eq!(backend.repository.calls(), 1);
    assert_eq!(protector.metrics().single_flight_hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_share_the_error() {
    let backend = Backend::with_latency(Duration::from_millis(50));
    let protector = backend.protector(ProtectorConfig::default());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let protector = protector.clone();
        handles.push(tokio::spawn(async move { protector.get("missing").await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap_err().is_not_found());
    }
    assert_eq!(backend.repository.calls(), 1);
}
