//! Stale values are served at once and refreshed once in the background.

use super::Backend;
use stampede_guard::{DataRecord, ProtectorConfig, ProtectorEventKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn seed_stale(backend: &Backend, key: &str, value: &str) {
    let writer = backend.protector(ProtectorConfig::default());
    writer
        .set(key, &DataRecord::new(key, value), Duration::ZERO)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn stale_burst_triggers_one_refresh() {
    let backend = Backend::with_latency(Duration::from_millis(50));
    backend.seed("k", "v2");
    seed_stale(&backend, "k", "v1").await;
    let protector = backend.protector(ProtectorConfig::builder().name("swr").build());

    let mut handles = Vec::new();
    for _ in 0..200 {
        let protector = protector.clone();
        handles.push(tokio::spawn(async move {
            protector.get_stale_while_revalidate("k").await
        }));
    }
    for handle in handles {
        // Every caller is answered from the cache, old or new.
        let value = handle.await.unwrap().unwrap().value;
        assert!(value == "v1" || value == "v2", "unexpected {value}");
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.repository.calls(), 1);

    let metrics = protector.metrics();
    assert_eq!(metrics.background_refresh, 1);
    assert!(metrics.stale_returns >= 1);
    assert_eq!(metrics.total_requests, 200);
    assert_eq!(protector.get("k").await.unwrap().value, "v2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refresh_lock_dedupes_across_processes() {
    let backend = Backend::with_latency(Duration::from_millis(50));
    backend.seed("k", "v2");
    seed_stale(&backend, "k", "v1").await;
    let first = backend.protector(ProtectorConfig::builder().name("first").build());
    let second = backend.protector(ProtectorConfig::builder().name("second").build());

    let (a, b) = tokio::join!(
        first.get_stale_while_revalidate("k"),
        second.get_stale_while_revalidate("k")
    );
    assert_eq!(a.unwrap().value, "v1");
    assert_eq!(b.unwrap().value, "v1");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.repository.calls(), 1);
    assert_eq!(
        first.metrics().background_refresh + second.metrics().background_refresh,
        1
    );
    assert!(!backend.locks.is_locked("refresh:k"));
}

#[tokio::test]
async fn saturated_pool_skips_refresh() {
    let backend = Backend::with_latency(Duration::from_millis(100));
    backend.seed("a", "a2");
    backend.seed("b", "b2");
    seed_stale(&backend, "a", "a1").await;
    seed_stale(&backend, "b", "b1").await;

    let rejected = Arc::new(AtomicUsize::new(0));
    let protector = {
        let rejected = Arc::clone(&rejected);
        backend.protector(
            ProtectorConfig::builder()
                .max_concurrent_refreshes(1)
                .on_event(move |event| {
                    if event.kind == ProtectorEventKind::RefreshRejected {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build(),
        )
    };

    assert_eq!(protector.get_stale_while_revalidate("a").await.unwrap().value, "a1");
    assert_eq!(protector.refreshes_in_flight(), 1);
    assert_eq!(protector.get_stale_while_revalidate("b").await.unwrap().value, "b1");

    assert_eq!(protector.metrics().refresh_rejected, 1);
    assert_eq!(rejected.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(protector.refreshes_in_flight(), 0);
    assert_eq!(backend.repository.calls(), 1);
}

#[tokio::test]
async fn slow_refresh_times_out_and_releases_its_lock() {
    let backend = Backend::with_latency(Duration::from_millis(300));
    backend.seed("k", "v2");
    seed_stale(&backend, "k", "v1").await;
    let protector = backend.protector(
        ProtectorConfig::builder()
            .refresh_timeout(Duration::from_millis(50))
            .build(),
    );

    assert_eq!(protector.get_stale_while_revalidate("k").await.unwrap().value, "v1");
    tokio::time::sleep(Duration::from_millis(150)).await;

    let metrics = protector.metrics();
    assert_eq!(metrics.refresh_failures, 1);
    assert_eq!(metrics.background_refresh, 0);
    assert!(!backend.locks.is_locked("refresh:k"));
}

#[tokio::test]
async fn fresh_value_is_a_plain_hit() {
    let backend = Backend::new();
    backend.seed("k", "v1");
    let protector = backend.protector(ProtectorConfig::default());

    protector.get("k").await.unwrap();
    assert_eq!(protector.get_stale_while_revalidate("k").await.unwrap().value, "v1");

    let metrics = protector.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.stale_returns, 0);
    assert_eq!(protector.refreshes_in_flight(), 0);
}
