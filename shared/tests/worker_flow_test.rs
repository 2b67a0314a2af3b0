// ============================================================================
// End-to-End Worker Flow
// ============================================================================
//
// Enqueue through the service facade, deliver through a worker, and check
// the observable side effects: driver call, ack, counters, audit record.
//
// ============================================================================

mod test_utils;

use courier_server_shared::keys;
use courier_server_shared::queue::QueueStore;
use courier_types::{JobStatus, Priority};
use std::time::Duration;
use test_utils::{eventually, fast_config, send_request, wait_for_final_status, TestEngine};

#[tokio::test]
async fn enqueue_then_send() {
    let mut engine = TestEngine::new(fast_config(), vec![]);
    engine.spawn_worker("worker-0");

    let job_id = engine
        .enqueue(send_request(vec!["a@example.com"], Priority::Medium))
        .await;

    let driver = engine.driver.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let driver = driver.clone();
            async move { driver.call_count() == 1 }
        })
        .await,
        "driver never saw the dispatch"
    );

    let calls = engine.driver.calls();
    assert_eq!(calls[0].recipients, vec!["a@example.com"]);
    assert_eq!(calls[0].subject, "Welcome, Ada");
    assert_eq!(calls[0].text.as_deref(), Some("Hello Ada"));

    // Entry acked, counters bumped, audit terminal
    let store = engine.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { store.stream_len(Priority::Medium).await.unwrap() == 0 }
        })
        .await
    );
    assert!(wait_for_final_status(&engine, &job_id, JobStatus::Sent).await);
    assert_eq!(engine.store.get_counter(keys::STATS_SENT).await.unwrap(), 1);

    let record = engine.service().job_audit(&job_id).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 0);
    assert_eq!(record.recipient_count, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn recipients_and_order_are_preserved() {
    let mut engine = TestEngine::new(fast_config(), vec![]);
    engine.spawn_worker("worker-0");

    engine
        .enqueue(send_request(
            vec!["first@example.com", "second@example.com", "first@example.com"],
            Priority::High,
        ))
        .await;

    let driver = engine.driver.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let driver = driver.clone();
            async move { driver.call_count() == 1 }
        })
        .await
    );

    assert_eq!(
        engine.driver.calls()[0].recipients,
        vec!["first@example.com", "second@example.com", "first@example.com"]
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_is_discarded_and_audited() {
    let mut engine = TestEngine::new(fast_config(), vec![]);

    engine
        .store
        .append(Priority::High, "broken-job", b"this is not messagepack")
        .await
        .unwrap();

    engine.spawn_worker("worker-0");

    let store = engine.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { store.stream_len(Priority::High).await.unwrap() == 0 }
        })
        .await,
        "malformed entry was not discarded"
    );

    // Never dispatched, never dead-lettered, but audited
    assert!(wait_for_final_status(&engine, "broken-job", JobStatus::Malformed).await);
    assert_eq!(engine.driver.call_count(), 0);
    assert_eq!(engine.store.dlq_len().await.unwrap(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn permanent_failure_dead_letters_without_retry() {
    use courier_server_shared::providers::SendOutcome;
    use courier_types::DeadLetterEntry;

    let mut engine = TestEngine::new(
        fast_config(),
        vec![SendOutcome::Permanent("550 mailbox unavailable".into())],
    );
    engine.spawn_worker("worker-0");

    let job_id = engine
        .enqueue(send_request(vec!["gone@example.com"], Priority::Medium))
        .await;

    let store = engine.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let store = store.clone();
            async move { store.dlq_len().await.unwrap() == 1 }
        })
        .await
    );
    assert!(wait_for_final_status(&engine, &job_id, JobStatus::FailedPermanent).await);

    // Exactly one dispatch, no park, stream drained
    assert_eq!(engine.driver.call_count(), 1);
    assert_eq!(engine.store.parked_len().await.unwrap(), 0);
    assert_eq!(engine.store.stream_len(Priority::Medium).await.unwrap(), 0);

    let entry_json = engine.store.dlq_get(&job_id).await.unwrap().unwrap();
    let entry: DeadLetterEntry = serde_json::from_str(&entry_json).unwrap();
    assert_eq!(entry.job_id, job_id);
    assert!(entry.failure_reason.contains("550"));
    assert_eq!(entry.final_attempt_count, 0);

    engine.shutdown().await;
}
