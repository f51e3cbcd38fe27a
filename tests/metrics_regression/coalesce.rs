//! Coalescer leader and waiter counts.

use super::helpers::*;
use serial_test::serial;
use stampede_guard_coalesce::{CoalesceConfig, Coalescer};
use std::time::Duration;

#[tokio::test]
#[serial]
async fn coalesce_metrics_exist() {
    init_recorder();

    let coalescer: Coalescer<&'static str, u32, String> =
        Coalescer::with_config(CoalesceConfig::builder().name("test_coalesce").build());
    let loader = || async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(1)
    };

    let (a, b) = tokio::join!(coalescer.run("k", loader), coalescer.run("k", loader));
    assert_eq!(a.result, Ok(1));
    assert_eq!(b.result, Ok(1));

    for role in ["leader", "waiter"] {
        assert_counter(
            "coalesce_requests_total",
            &[("coalesce", "test_coalesce"), ("role", role)],
        );
    }
}
