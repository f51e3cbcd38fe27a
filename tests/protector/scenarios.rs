//! Round trips, failure handling and end-to-end flows.

use super::{Backend, init_tracing};
use recorder::EventLog;
use stampede_guard::{
    CircuitState, DataRecord, ProtectorConfig, ProtectorEventKind, RepositoryError, StampedeError,
};
use std::time::Duration;
use tower::{Service, ServiceExt};

/// Collects protector events in emission order.
mod recorder {
    use stampede_guard::{ProtectorEvent, ProtectorEventKind};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct EventLog(Arc<Mutex<Vec<ProtectorEventKind>>>);

    impl EventLog {
        pub fn push(&self, event: &ProtectorEvent) {
            self.0.lock().unwrap().push(event.kind.clone());
        }

        pub fn take(&self) -> Vec<ProtectorEventKind> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }
}

#[tokio::test]
async fn set_then_get_round_trip() {
    let backend = Backend::new();
    let protector = backend.protector(ProtectorConfig::default());
    let record = DataRecord::new("user:7", "grace");

    protector
        .set("user:7", &record, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(protector.get("user:7").await.unwrap(), record);
    assert_eq!(backend.repository.calls(), 0);
    assert_eq!(protector.metrics().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_value_is_refreshed_end_to_end() {
    let backend = Backend::new();
    backend.seed("k", "v2");
    let protector = backend.protector(
        ProtectorConfig::builder()
            .base_ttl(Duration::from_secs(1))
            .jitter_percent(0.05)
            .build(),
    );

    protector
        .set("k", &DataRecord::new("k", "v1"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(protector.get("k").await.unwrap().value, "v1");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        protector.get_stale_while_revalidate("k").await.unwrap().value,
        "v1"
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(protector.get("k").await.unwrap().value, "v2");

    let metrics = protector.metrics();
    assert_eq!(metrics.stale_returns, 1);
    assert_eq!(metrics.background_refresh, 1);
    assert_eq!(backend.repository.calls(), 1);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let backend = Backend::new();
    let protector = backend.protector(ProtectorConfig::builder().failure_threshold(1).build());

    let err = protector.get("ghost").await.unwrap_err();
    assert_eq!(
        err,
        StampedeError::NotFound {
            key: "ghost".into()
        }
    );
    assert_eq!(protector.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn breaker_opens_then_recovers() {
    init_tracing();
    let backend = Backend::new();
    backend.seed("k", "v1");
    backend
        .repository
        .set_failure(Some(RepositoryError::Unavailable("db down".into())));

    let transitions = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let protector = {
        let transitions = transitions.clone();
        backend.protector(
            ProtectorConfig::builder()
                .name("breaker")
                .failure_threshold(2)
                .breaker_timeout(Duration::from_millis(100))
                .on_circuit_transition(move |from, to| {
                    transitions.lock().unwrap().push((from, to));
                })
                .build(),
        )
    };

    for _ in 0..2 {
        let err = protector.get("k").await.unwrap_err();
        assert!(matches!(err, StampedeError::Repository { .. }));
    }
    assert_eq!(protector.circuit_state(), CircuitState::Open);

    let err = protector.get("k").await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(backend.repository.calls(), 2);
    assert_eq!(protector.metrics().circuit_breaker_trips, 1);

    backend.repository.set_failure(None);
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(protector.get("k").await.unwrap().value, "v1");
    assert_eq!(protector.circuit_state(), CircuitState::Closed);
    assert_eq!(
        *transitions.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test]
async fn open_breaker_still_serves_stale_values() {
    let backend = Backend::new();
    backend.seed("k", "v2");
    let protector = backend.protector(
        ProtectorConfig::builder()
            .failure_threshold(1)
            .breaker_timeout(Duration::from_secs(60))
            .build(),
    );
    protector
        .set("k", &DataRecord::new("k", "v1"), Duration::ZERO)
        .await
        .unwrap();
    protector.circuit_breaker().force_open();

    assert_eq!(
        protector.get_stale_while_revalidate("k").await.unwrap().value,
        "v1"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let metrics = protector.metrics();
    assert_eq!(metrics.stale_returns, 1);
    assert_eq!(metrics.refresh_failures, 1);
    assert_eq!(metrics.circuit_breaker_trips, 1);
    assert_eq!(backend.repository.calls(), 0);
}

#[tokio::test]
async fn events_follow_the_read_path() {
    let backend = Backend::new();
    backend.seed("k", "v1");
    let log = EventLog::default();
    let protector = {
        let log = log.clone();
        backend.protector(
            ProtectorConfig::builder()
                .name("events")
                .on_event(move |event| log.push(event))
                .build(),
        )
    };

    protector.get("k").await.unwrap();
    assert_eq!(
        log.take(),
        vec![ProtectorEventKind::CacheMiss, ProtectorEventKind::LockAcquired]
    );

    protector.get("k").await.unwrap();
    assert_eq!(log.take(), vec![ProtectorEventKind::CacheHit]);
}

#[tokio::test]
async fn invalidate_then_reload() {
    let backend = Backend::new();
    backend.seed("k", "v1");
    let protector = backend.protector(ProtectorConfig::default());

    assert_eq!(protector.get("k").await.unwrap().value, "v1");
    backend.seed("k", "v2");
    assert_eq!(protector.get("k").await.unwrap().value, "v1");

    protector.invalidate("k").await.unwrap();
    assert_eq!(protector.get("k").await.unwrap().value, "v2");
    assert_eq!(backend.repository.calls(), 2);
}

#[tokio::test]
async fn protector_serves_as_a_tower_service() {
    let backend = Backend::new();
    backend.seed("k", "v1");
    let mut service = backend.protector(ProtectorConfig::default());

    let record = service.ready().await.unwrap().call("k".to_string()).await.unwrap();
    assert_eq!(record.value, "v1");

    let err = service.oneshot("ghost".to_string()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn never_expiring_ttl_round_trips() {
    let backend = Backend::new();
    let protector = backend.protector(ProtectorConfig::default());
    let record = DataRecord::new("config", "pinned");

    protector.set("config", &record, Duration::MAX).await.unwrap();
    assert_eq!(protector.get("config").await.unwrap(), record);
    assert_eq!(
        protector.get_stale_while_revalidate("config").await.unwrap(),
        record
    );
    assert_eq!(protector.metrics().stale_returns, 0);
}
