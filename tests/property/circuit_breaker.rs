//! Property tests for the circuit breaker.
//!
//! Invariants tested:
//! - The breaker opens exactly when the run of consecutive failures reaches
//!   the threshold
//! - Once open (within the cooldown) every call is rejected without running
//! - Failures the classifier ignores never open the breaker

use proptest::prelude::*;
use stampede_guard_circuitbreaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: state matches a consecutive-failure model after every call
    #[test]
    fn opens_on_consecutive_failures(
        threshold in 1usize..=10,
        outcomes in prop::collection::vec(any::<bool>(), 1..60),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let cb: CircuitBreaker<String> = CircuitBreaker::new(
                CircuitBreaker::builder()
                    .failure_threshold(threshold)
                    .timeout(Duration::from_secs(3600))
                    .build(),
            );
            let executed = AtomicUsize::new(0);
            let mut consecutive = 0;
            let mut open = false;
            let mut expected_executions = 0;

            for ok in outcomes {
                let result = cb
                    .call(async {
                        executed.fetch_add(1, Ordering::SeqCst);
                        if ok { Ok(()) } else { Err("boom".to_string()) }
                    })
                    .await;

                if open {
                    prop_assert_eq!(result, Err(CircuitBreakerError::OpenCircuit));
                } else {
                    expected_executions += 1;
                    consecutive = if ok { 0 } else { consecutive + 1 };
                    open = consecutive >= threshold;
                }

                let expected = if open { CircuitState::Open } else { CircuitState::Closed };
                prop_assert_eq!(cb.state(), expected);
            }

            prop_assert_eq!(executed.load(Ordering::SeqCst), expected_executions);
            Ok(())
        })?;
    }

    /// Property: errors the classifier rejects never trip the breaker
    #[test]
    fn ignored_errors_never_trip(
        threshold in 1usize..=5,
        calls in 1usize..=50,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let cb: CircuitBreaker<String> = CircuitBreaker::new(
                CircuitBreaker::builder()
                    .failure_threshold(threshold)
                    .failure_classifier(|err: &String| err != "not found")
                    .build(),
            );
            for _ in 0..calls {
                let result = cb.call(async { Err::<(), _>("not found".to_string()) }).await;
                prop_assert_eq!(result, Err(CircuitBreakerError::Inner("not found".to_string())));
            }
            prop_assert_eq!(cb.state(), CircuitState::Closed);
            Ok(())
        })?;
    }
}
