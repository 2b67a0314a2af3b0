// ============================================================================
// Reclaim After Consumer Death
// ============================================================================
//
// An entry delivered to a consumer that never acks becomes reclaimable once
// its idle time passes PENDING_TIMEOUT. The reclaiming process re-runs it
// through the normal state machine; the attempt counter does not move
// because a redelivery is not a retry.
//
// ============================================================================

mod test_utils;

use courier_server_shared::keys;
use courier_server_shared::queue::QueueStore;
use courier_server_shared::worker::Reclaimer;
use courier_types::{JobStatus, Priority};
use std::time::Duration;
use test_utils::{eventually, fast_config, send_request, wait_for_final_status, TestEngine};

#[tokio::test]
async fn stale_pending_entry_is_reclaimed_and_sent() {
    let engine = TestEngine::new(fast_config(), vec![]);

    let job_id = engine
        .enqueue(send_request(vec!["a@example.com"], Priority::Medium))
        .await;

    // Simulate a worker that died mid-dispatch: entry delivered, never acked
    let delivered = engine
        .store
        .read_group(keys::CONSUMER_GROUP, "dead-proc", &Priority::ALL, 1, 100)
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);

    // Let the entry cross the (1s) pending timeout, then sweep
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let (_, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut reclaimer = Reclaimer::new(engine.ctx.clone(), shutdown_rx);
    reclaimer.sweep().await.unwrap();

    let driver = engine.driver.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            let driver = driver.clone();
            async move { driver.call_count() == 1 }
        })
        .await,
        "reclaimed entry was never dispatched"
    );

    // Redelivery, not retry: the counter never moved
    assert!(wait_for_final_status(&engine, &job_id, JobStatus::Sent).await);
    let record = engine.service().job_audit(&job_id).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 0);

    assert_eq!(engine.store.stream_len(Priority::Medium).await.unwrap(), 0);
    assert!(engine
        .store
        .pending(Priority::Medium, keys::CONSUMER_GROUP)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fresh_pending_entries_are_left_alone() {
    let engine = TestEngine::new(fast_config(), vec![]);

    engine
        .enqueue(send_request(vec!["a@example.com"], Priority::High))
        .await;
    engine
        .store
        .read_group(keys::CONSUMER_GROUP, "other-proc", &Priority::ALL, 1, 100)
        .await
        .unwrap();

    // Entry is pending but nowhere near the idle timeout
    let (_, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut reclaimer = Reclaimer::new(engine.ctx.clone(), shutdown_rx);
    reclaimer.sweep().await.unwrap();

    assert_eq!(engine.driver.call_count(), 0);
    let pending = engine
        .store
        .pending(Priority::High, keys::CONSUMER_GROUP)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "other-proc");
    assert_eq!(pending[0].delivery_count, 1);
}
