// ============================================================================
// Rate-Limit Behavior Under Contention
// ============================================================================
//
// With a 2-token zero-refill SMTP bucket and five jobs, exactly two dispatch
// immediately; the rest cycle through the retry controller and eventually
// dead-letter without ever reaching the provider.
//
// ============================================================================

mod test_utils;

use courier_config::RateBucket;
use courier_server_shared::keys;
use courier_server_shared::queue::QueueStore;
use courier_types::{Priority, ProviderKind};
use std::time::Duration;
use test_utils::{eventually, fast_config, send_request, TestEngine};

#[tokio::test]
async fn bucket_exhaustion_sends_some_and_dead_letters_the_rest() {
    let mut config = fast_config();
    config.providers.set_bucket(
        ProviderKind::Smtp,
        RateBucket {
            capacity: 2.0,
            refill_per_sec: 0.0,
        },
    );
    // rate_wait_max_s = 0 (fast_config): one refusal ends the wait

    let mut engine = TestEngine::new(config, vec![]);
    engine.spawn_worker("worker-0");

    for i in 0..5 {
        engine
            .enqueue(send_request(
                vec![&format!("user{i}@example.com")],
                Priority::Medium,
            ))
            .await;
    }

    // The three refused jobs need MAX_ATTEMPTS (3) cycles each before DLQ;
    // drive the scheduler promotions until they all land there
    let store = engine.store.clone();
    let drained = eventually(Duration::from_secs(10), || {
        let store = store.clone();
        let engine_store = store.clone();
        async move {
            let _ = engine_store.promote_due(i64::MAX / 2, 1024).await;
            store.dlq_len().await.unwrap() == 3
        }
    })
    .await;
    assert!(drained, "rate-limited jobs never dead-lettered");

    // Token-bucket soundness: only the two funded dispatches ever happened
    assert_eq!(engine.driver.call_count(), 2);
    assert_eq!(engine.store.get_counter(keys::STATS_SENT).await.unwrap(), 2);
    let store = engine.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { store.get_counter(keys::STATS_FAILED).await.unwrap() == 3 }
        })
        .await
    );
    assert_eq!(engine.store.parked_len().await.unwrap(), 0);
    assert_eq!(engine.store.stream_len(Priority::Medium).await.unwrap(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn empty_bucket_with_refill_recovers() {
    // Empty bucket, 10 tokens/s: within ~1/refill_rate the next job sends
    let mut config = fast_config();
    config.worker.rate_wait_max_s = 5;
    config.providers.set_bucket(
        ProviderKind::Smtp,
        RateBucket {
            capacity: 1.0,
            refill_per_sec: 10.0,
        },
    );

    let mut engine = TestEngine::new(config, vec![]);
    engine.spawn_worker("worker-0");

    for i in 0..3 {
        engine
            .enqueue(send_request(
                vec![&format!("user{i}@example.com")],
                Priority::High,
            ))
            .await;
    }

    let driver = engine.driver.clone();
    assert!(
        eventually(Duration::from_secs(5), || {
            let driver = driver.clone();
            async move { driver.call_count() == 3 }
        })
        .await,
        "refilling bucket never funded all dispatches"
    );

    assert_eq!(engine.store.dlq_len().await.unwrap(), 0);

    engine.shutdown().await;
}
