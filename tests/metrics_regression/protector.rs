//! Protector counters, all labelled with the protector name.

use super::helpers::*;
use serial_test::serial;
use stampede_guard::{
    DataRecord, InMemoryCache, InMemoryLockManager, InMemoryRepository, LockManager, Protector,
    ProtectorConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn protector_metrics_exist() {
    init_recorder();

    let repository = Arc::new(InMemoryRepository::new());
    repository.insert("k", DataRecord::new("k", "v2"));
    let protector: Protector<DataRecord> = Protector::new(
        Arc::new(InMemoryCache::new()),
        repository,
        Arc::new(InMemoryLockManager::new()),
        ProtectorConfig::builder().name("metrics_protector").build(),
    );

    // Miss, load under the lock, then hit
    protector.get("k").await.unwrap();
    protector.get("k").await.unwrap();

    // Stale read with a background refresh
    protector
        .set("k", &DataRecord::new("k", "v1"), Duration::ZERO)
        .await
        .unwrap();
    protector.get_stale_while_revalidate("k").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let this = ("protector", "metrics_protector");
    assert_counter("stampede_requests_total", &[this]);
    assert_counter("stampede_cache_lookups_total", &[this, ("result", "hit")]);
    assert_counter("stampede_cache_lookups_total", &[this, ("result", "miss")]);
    assert_counter("stampede_lock_acquisitions_total", &[this]);
    assert_counter("stampede_stale_returns_total", &[this]);
    assert_counter("stampede_refreshes_total", &[this, ("result", "completed")]);
}

#[tokio::test]
#[serial]
async fn protector_trip_and_fallback_metrics() {
    init_recorder();

    let locks = Arc::new(InMemoryLockManager::new());
    let repository = Arc::new(InMemoryRepository::new());
    repository.insert("k", DataRecord::new("k", "v"));
    let protector: Protector<DataRecord> = Protector::new(
        Arc::new(InMemoryCache::new()),
        repository,
        locks.clone(),
        ProtectorConfig::builder()
            .name("metrics_fallback")
            .lock_busy_wait(Duration::from_millis(5))
            .build(),
    );

    // A lock nobody will release forces the fallback path.
    let _orphan = locks
        .try_lock("k", Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    protector.get("k").await.unwrap();

    protector.circuit_breaker().force_open();
    protector.invalidate("k").await.unwrap();
    assert!(protector.get("k").await.unwrap_err().is_circuit_open());

    let this = ("protector", "metrics_fallback");
    assert_counter("stampede_fallback_loads_total", &[this]);
    assert_counter("stampede_circuit_trips_total", &[this]);
}
