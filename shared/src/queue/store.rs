// ============================================================================
// Queue Store Contract
// ============================================================================
//
// Durable priority streams with consumer-group semantics, the parked set for
// future-dated work, DLQ storage, counters, audit records, rate buckets and
// worker liveness. The engine talks only to this trait; all multi-step
// updates are atomic inside the implementation.
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use courier_types::{Priority, ProviderKind};

/// One delivered stream entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub priority: Priority,
    pub entry_id: String,
    pub job_id: String,
    pub payload: Vec<u8>,
}

/// One row of the pending listing for a consumer group.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entry_id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Result of an atomic enqueue.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// Appended to a ready stream; depth is the stream length at enqueue.
    Queued { entry_id: String, depth: u64 },
    /// Parked for future promotion.
    Parked,
    /// Refused by the dedup window (same job_id enqueued twice).
    Duplicate,
}

/// Observed rate-bucket state, for the stats surface.
#[derive(Debug, Clone, Copy)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    // ===== Enqueue (atomic with audit + service counters) =====

    /// Append a job to its priority stream together with its audit record,
    /// the per-service counters and the daily call timeline.
    #[allow(clippy::too_many_arguments)]
    async fn enqueue_ready(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        audit_json: &str,
        service: &str,
        endpoint: &str,
        recipient_count: usize,
        now_ms: i64,
    ) -> Result<EnqueueOutcome>;

    /// Park a future-dated job (due at `due_ms`) with the same bookkeeping.
    #[allow(clippy::too_many_arguments)]
    async fn enqueue_parked(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        due_ms: i64,
        audit_json: &str,
        service: &str,
        endpoint: &str,
        recipient_count: usize,
        now_ms: i64,
    ) -> Result<EnqueueOutcome>;

    /// Low-level append of a serialized job to a ready stream, without the
    /// enqueue bookkeeping. Returns the entry id.
    async fn append(&self, priority: Priority, job_id: &str, payload: &[u8]) -> Result<String>;

    // ===== Consumer group =====

    /// Read up to `max` entries for `consumer`, polling `priorities` in the
    /// order given. Blocks up to `block_ms` when nothing is immediately
    /// available; returns empty on timeout.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        priorities: &[Priority],
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueEntry>>;

    /// Acknowledge an entry and drop it from the stream body.
    async fn ack(&self, priority: Priority, group: &str, entry_id: &str) -> Result<()>;

    /// List delivered-but-unacknowledged entries for the group.
    async fn pending(&self, priority: Priority, group: &str) -> Result<Vec<PendingEntry>>;

    /// Reassign entries idle for at least `min_idle_ms` to `consumer`,
    /// returning the claimed entries with payloads.
    async fn claim(
        &self,
        priority: Priority,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        entry_ids: &[String],
    ) -> Result<Vec<QueueEntry>>;

    // ===== Parked set =====

    /// Park a job for retry; plain parking without enqueue bookkeeping.
    async fn park(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        due_ms: i64,
    ) -> Result<()>;

    /// Atomically move every parked job due at or before `now_ms` onto its
    /// ready stream. Returns the promoted job ids.
    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<Vec<String>>;

    // ===== Dead letter queue =====

    async fn dead_letter(&self, job_id: &str, entry_json: &str) -> Result<()>;
    async fn dlq_get(&self, job_id: &str) -> Result<Option<String>>;
    async fn dlq_len(&self) -> Result<u64>;

    // ===== Counters =====

    /// Increment a counter; `ttl_s` is applied on first touch for daily keys.
    async fn incr_counter(&self, key: &str, delta: i64, ttl_s: Option<u64>) -> Result<i64>;
    async fn get_counter(&self, key: &str) -> Result<i64>;

    // ===== Audit KV =====

    /// Best-effort overwrite of an audit record (terminal transitions).
    async fn put_audit(&self, job_id: &str, record_json: &str, ttl_s: u64) -> Result<()>;
    async fn get_audit(&self, job_id: &str) -> Result<Option<String>>;
    /// Per-service metric counters collected at enqueue.
    async fn get_service_metrics(
        &self,
        service: &str,
    ) -> Result<std::collections::HashMap<String, i64>>;

    // ===== Rate buckets =====

    /// Atomic token-bucket check-and-consume. The whole computation runs
    /// server-side; two concurrent callers can never overspend the bucket.
    async fn try_acquire(
        &self,
        provider: ProviderKind,
        requested: f64,
        capacity: f64,
        refill_per_sec: f64,
        now_ms: i64,
    ) -> Result<bool>;

    async fn bucket_state(&self, provider: ProviderKind) -> Result<Option<BucketState>>;

    // ===== Liveness / locks =====

    async fn heartbeat(&self, worker_id: &str, ttl_s: u64) -> Result<()>;
    async fn alive_workers(&self) -> Result<Vec<String>>;

    /// Acquire a singleton lock (scheduler election). True when this owner
    /// now holds the lock.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool>;
    /// Refresh a held lock; false when ownership was lost.
    async fn refresh_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool>;

    // ===== Depth / health =====

    async fn stream_len(&self, priority: Priority) -> Result<u64>;
    async fn parked_len(&self) -> Result<u64>;
    async fn ping(&self) -> Result<()>;
}
