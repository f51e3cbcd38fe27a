//! Failures are delivered to every caller of a flight.

use super::TestError;
use stampede_guard_coalesce::{CoalesceError, Coalescer};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loader_error_reaches_every_waiter() {
    let coalescer: Coalescer<&'static str, String, TestError> = Coalescer::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coalescer = coalescer.clone();
        handles.push(tokio::spawn(async move {
            coalescer
                .run("k", || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(TestError::new("backend down"))
                })
                .await
                .result
        }));
    }

    for handle in handles {
        assert_eq!(
            handle.await.unwrap(),
            Err(CoalesceError::Loader(TestError::new("backend down")))
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loader_panic_reaches_every_waiter() {
    let coalescer: Coalescer<&'static str, String, TestError> = Coalescer::new();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coalescer = coalescer.clone();
        handles.push(tokio::spawn(async move {
            coalescer
                .run("k", || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    if true {
                        panic!("corrupt row");
                    }
                    Ok(String::new())
                })
                .await
                .result
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Err(CoalesceError::LoaderPanicked(message)) => assert!(message.contains("corrupt row")),
            other => panic!("expected panic report, got {other:?}"),
        }
    }
    assert_eq!(coalescer.in_flight(), 0);
}

#[tokio::test]
async fn timed_out_waiter_leaves_flight_running() {
    let coalescer: Coalescer<&'static str, u32, TestError> = Coalescer::new();
    let loader = || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(7)
    };

    let gave_up = tokio::time::timeout(Duration::from_millis(5), coalescer.run("k", loader)).await;
    assert!(gave_up.is_err());
    assert!(coalescer.is_in_flight(&"k"));

    let joined = coalescer.run("k", loader).await;
    assert_eq!(joined.result, Ok(7));
    assert!(joined.shared);
}

#[tokio::test]
async fn panic_while_building_the_loader_is_reported() {
    let coalescer: Coalescer<&'static str, String, TestError> = Coalescer::new();

    let out = coalescer
        .run("k", || -> std::future::Ready<Result<String, TestError>> {
            panic!("bad request key")
        })
        .await;
    match out.result {
        Err(CoalesceError::LoaderPanicked(message)) => assert!(message.contains("bad request key")),
        other => panic!("expected panic report, got {other:?}"),
    }
    assert!(!out.shared);
    assert_eq!(coalescer.in_flight(), 0);

    // The key is usable again straight away.
    let retry = coalescer.run("k", || async { Ok("ok".to_string()) }).await;
    assert_eq!(retry.result, Ok("ok".to_string()));
}
