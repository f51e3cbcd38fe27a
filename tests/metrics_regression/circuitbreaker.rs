//! Circuit breaker call, transition and state metrics.

use super::helpers::*;
use serial_test::serial;
use stampede_guard_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use std::time::Duration;

#[tokio::test]
#[serial]
async fn circuitbreaker_metrics_exist() {
    init_recorder();

    let cb: CircuitBreaker<String> = CircuitBreaker::new(
        CircuitBreakerConfig::builder()
            .name("test_cb")
            .failure_threshold(2)
            .timeout(Duration::from_secs(60))
            .build(),
    );

    let _ = cb.call(async { Ok::<_, String>(()) }).await;
    for _ in 0..2 {
        let _ = cb.call(async { Err::<(), _>("failure".to_string()) }).await;
    }
    let _ = cb.call(async { Ok::<_, String>(()) }).await;

    for outcome in ["success", "failure", "rejected"] {
        assert_counter(
            "circuitbreaker_calls_total",
            &[("circuitbreaker", "test_cb"), ("outcome", outcome)],
        );
    }
    assert_counter(
        "circuitbreaker_transitions_total",
        &[("circuitbreaker", "test_cb"), ("from", "Closed"), ("to", "Open")],
    );
    assert_gauge("circuitbreaker_state", &[("circuitbreaker", "test_cb")]);
}
