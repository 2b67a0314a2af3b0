// ============================================================================
// Redis Queue Store
// ============================================================================
//
// Production implementation of the queue store: Redis Streams for the three
// priority queues, a sorted set + payload hash for parked jobs, hashes for
// the DLQ and rate buckets, and Lua scripts for every multi-step update.
//
// ============================================================================

use crate::keys;
use crate::queue::store::{BucketState, EnqueueOutcome, PendingEntry, QueueEntry, QueueStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::{
    AUDIT_TTL_S, DEDUP_TTL_S, RATE_BUCKET_TTL_S, TIMELINE_TTL_S,
};
use courier_redis::{
    enqueue_parked_script, enqueue_ready_script, promote_due_script, refresh_lock_script,
    token_bucket_script, RedisClient, StreamEntry,
};
use courier_types::{Priority, ProviderKind};
use redis::Script;

pub struct RedisQueueStore {
    client: RedisClient,
    token_bucket: Script,
    enqueue_ready: Script,
    enqueue_parked: Script,
    promote_due: Script,
    refresh_lock: Script,
    counter_with_ttl: Script,
}

impl RedisQueueStore {
    /// Connect and bootstrap the consumer group on every priority stream.
    pub async fn connect(redis_url: &str, group: &str) -> Result<Self> {
        let mut client = RedisClient::connect(redis_url)
            .await
            .context("Failed to connect to Redis")?;

        for priority in Priority::ALL {
            client
                .ensure_group(&keys::ready_stream(priority), group)
                .await
                .with_context(|| format!("Failed to create consumer group on {priority} stream"))?;
        }

        Ok(Self {
            client,
            token_bucket: token_bucket_script(),
            enqueue_ready: enqueue_ready_script(),
            enqueue_parked: enqueue_parked_script(),
            promote_due: promote_due_script(),
            refresh_lock: refresh_lock_script(),
            // INCRBY + EXPIRE only on first touch, in one round trip
            counter_with_ttl: Script::new(
                r"
                local count = redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
                if count == tonumber(ARGV[1]) then
                    redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
                end
                return count
                ",
            ),
        })
    }

    fn client(&self) -> RedisClient {
        self.client.clone()
    }

    fn entry_from(priority: Priority, entry: StreamEntry) -> Option<QueueEntry> {
        let job_id = entry
            .fields
            .get("job_id")
            .map(|b| String::from_utf8_lossy(b).to_string())?;
        let payload = entry.fields.get("job")?.clone();
        Some(QueueEntry {
            priority,
            entry_id: entry.id,
            job_id,
            payload,
        })
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
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
    ) -> Result<EnqueueOutcome> {
        let mut client = self.client();
        let day = chrono::Utc::now();

        let (entry_id, depth): (String, i64) = self
            .enqueue_ready
            .key(keys::ready_stream(priority))
            .key(keys::DEDUP)
            .key(keys::audit_job(job_id))
            .key(keys::service_timeline(service, day))
            .key(keys::service_metrics(service))
            .arg(job_id)
            .arg(payload)
            .arg(audit_json)
            .arg(now_ms)
            .arg(endpoint)
            .arg(recipient_count)
            .arg(AUDIT_TTL_S)
            .arg(TIMELINE_TTL_S)
            .arg(DEDUP_TTL_S)
            .invoke_async(client.connection_mut())
            .await
            .context("Failed to enqueue job")?;

        if entry_id.is_empty() {
            return Ok(EnqueueOutcome::Duplicate);
        }
        Ok(EnqueueOutcome::Queued {
            entry_id,
            depth: depth.max(0) as u64,
        })
    }

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
    ) -> Result<EnqueueOutcome> {
        let mut client = self.client();
        let day = chrono::Utc::now();

        let stored: i64 = self
            .enqueue_parked
            .key(keys::PARKED)
            .key(keys::PARKED_PAYLOAD)
            .key(keys::DEDUP)
            .key(keys::audit_job(job_id))
            .key(keys::service_timeline(service, day))
            .key(keys::service_metrics(service))
            .arg(job_id)
            .arg(keys::parked_member(priority, job_id))
            .arg(payload)
            .arg(due_ms)
            .arg(audit_json)
            .arg(now_ms)
            .arg(endpoint)
            .arg(recipient_count)
            .arg(AUDIT_TTL_S)
            .arg(TIMELINE_TTL_S)
            .arg(DEDUP_TTL_S)
            .invoke_async(client.connection_mut())
            .await
            .context("Failed to park scheduled job")?;

        if stored == 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }
        Ok(EnqueueOutcome::Parked)
    }

    async fn append(&self, priority: Priority, job_id: &str, payload: &[u8]) -> Result<String> {
        let mut client = self.client();
        let entry_id = client
            .xadd_job(&keys::ready_stream(priority), job_id, payload)
            .await
            .context("Failed to append job to stream")?;
        Ok(entry_id)
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        priorities: &[Priority],
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueEntry>> {
        let mut client = self.client();

        // First sweep: non-blocking, strictly in the order given, so HIGH
        // entries win even when every stream has work.
        for &priority in priorities {
            let stream = keys::ready_stream(priority);
            let entries = client
                .read_group_entries(group, consumer, &[stream.as_str()], max, None)
                .await
                .context("Failed to read from priority stream")?;
            if !entries.is_empty() {
                return Ok(entries
                    .into_iter()
                    .filter_map(|e| Self::entry_from(priority, e))
                    .collect());
            }
        }

        if block_ms == 0 {
            return Ok(Vec::new());
        }

        // Nothing ready: long-poll across all streams at once, then keep
        // only the highest-priority stream that woke us.
        let streams: Vec<String> = priorities.iter().map(|p| keys::ready_stream(*p)).collect();
        let stream_refs: Vec<&str> = streams.iter().map(String::as_str).collect();
        let entries = client
            .read_group_entries(group, consumer, &stream_refs, max, Some(block_ms))
            .await
            .context("Failed blocking read on priority streams")?;

        for &priority in priorities {
            let stream = keys::ready_stream(priority);
            let matched: Vec<QueueEntry> = entries
                .iter()
                .filter(|e| e.stream == stream)
                .cloned()
                .filter_map(|e| Self::entry_from(priority, e))
                .collect();
            if !matched.is_empty() {
                return Ok(matched);
            }
        }
        Ok(Vec::new())
    }

    async fn ack(&self, priority: Priority, group: &str, entry_id: &str) -> Result<()> {
        let mut client = self.client();
        let stream = keys::ready_stream(priority);
        client
            .xack_entry(&stream, group, entry_id)
            .await
            .context("Failed to ack stream entry")?;
        client
            .xdel_entry(&stream, entry_id)
            .await
            .context("Failed to delete acked entry")?;
        Ok(())
    }

    async fn pending(&self, priority: Priority, group: &str) -> Result<Vec<PendingEntry>> {
        let mut client = self.client();
        let rows = client
            .xpending_entries(&keys::ready_stream(priority), group, 128)
            .await
            .context("Failed to list pending entries")?;
        Ok(rows
            .into_iter()
            .map(|row| PendingEntry {
                entry_id: row.id,
                consumer: row.consumer,
                idle_ms: row.idle_ms,
                delivery_count: row.delivery_count,
            })
            .collect())
    }

    async fn claim(
        &self,
        priority: Priority,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        entry_ids: &[String],
    ) -> Result<Vec<QueueEntry>> {
        let mut client = self.client();
        let entries = client
            .xclaim_entries(
                &keys::ready_stream(priority),
                group,
                consumer,
                min_idle_ms,
                entry_ids,
            )
            .await
            .context("Failed to claim pending entries")?;
        Ok(entries
            .into_iter()
            .filter_map(|e| Self::entry_from(priority, e))
            .collect())
    }

    async fn park(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        due_ms: i64,
    ) -> Result<()> {
        let mut client = self.client();

        // ZADD + HSET must land together or the promoter would drop the job
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("ZADD")
            .arg(keys::PARKED)
            .arg(due_ms)
            .arg(keys::parked_member(priority, job_id));
        pipe.cmd("HSET")
            .arg(keys::PARKED_PAYLOAD)
            .arg(job_id)
            .arg(payload);
        let _: (i64, i64) = pipe
            .query_async(client.connection_mut())
            .await
            .context("Failed to park job")?;
        Ok(())
    }

    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<Vec<String>> {
        let mut client = self.client();
        let promoted: Vec<String> = self
            .promote_due
            .key(keys::PARKED)
            .key(keys::PARKED_PAYLOAD)
            .arg(now_ms)
            .arg(limit)
            .arg(keys::READY_STREAM_PREFIX)
            .invoke_async(client.connection_mut())
            .await
            .context("Failed to promote due jobs")?;
        Ok(promoted)
    }

    async fn dead_letter(&self, job_id: &str, entry_json: &str) -> Result<()> {
        let mut client = self.client();
        client
            .hset(keys::DLQ, job_id, entry_json)
            .await
            .context("Failed to write dead letter entry")?;
        Ok(())
    }

    async fn dlq_get(&self, job_id: &str) -> Result<Option<String>> {
        let mut client = self.client();
        Ok(client.hget(keys::DLQ, job_id).await?)
    }

    async fn dlq_len(&self) -> Result<u64> {
        let mut client = self.client();
        Ok(client.hlen(keys::DLQ).await?)
    }

    async fn incr_counter(&self, key: &str, delta: i64, ttl_s: Option<u64>) -> Result<i64> {
        let mut client = self.client();
        let count = match ttl_s {
            Some(ttl) => self
                .counter_with_ttl
                .key(key)
                .arg(delta)
                .arg(ttl)
                .invoke_async(client.connection_mut())
                .await?,
            None => client.incr_by(key, delta).await?,
        };
        Ok(count)
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        let mut client = self.client();
        let value: Option<i64> = client.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn put_audit(&self, job_id: &str, record_json: &str, ttl_s: u64) -> Result<()> {
        let mut client = self.client();
        client
            .set_ex(&keys::audit_job(job_id), record_json, ttl_s)
            .await?;
        Ok(())
    }

    async fn get_audit(&self, job_id: &str) -> Result<Option<String>> {
        let mut client = self.client();
        Ok(client.get(&keys::audit_job(job_id)).await?)
    }

    async fn get_service_metrics(
        &self,
        service: &str,
    ) -> Result<std::collections::HashMap<String, i64>> {
        let mut client = self.client();
        let raw = client.hgetall(&keys::service_metrics(service)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| v.parse().ok().map(|n| (k, n)))
            .collect())
    }

    async fn try_acquire(
        &self,
        provider: ProviderKind,
        requested: f64,
        capacity: f64,
        refill_per_sec: f64,
        now_ms: i64,
    ) -> Result<bool> {
        let mut client = self.client();
        let allowed: i64 = self
            .token_bucket
            .key(keys::rate_bucket(provider))
            .arg(capacity)
            .arg(refill_per_sec)
            .arg(requested)
            .arg(now_ms)
            .arg(RATE_BUCKET_TTL_S)
            .invoke_async(client.connection_mut())
            .await
            .context("Failed to evaluate rate bucket")?;
        Ok(allowed == 1)
    }

    async fn bucket_state(&self, provider: ProviderKind) -> Result<Option<BucketState>> {
        let mut client = self.client();
        let raw = client.hgetall(&keys::rate_bucket(provider)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        let tokens = raw.get("tokens").and_then(|v| v.parse().ok()).unwrap_or(0.0);
        let last_refill_ms = raw
            .get("last_refill_ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(BucketState {
            tokens,
            last_refill_ms,
        }))
    }

    async fn heartbeat(&self, worker_id: &str, ttl_s: u64) -> Result<()> {
        let mut client = self.client();
        client
            .set_ex(&keys::worker_heartbeat(worker_id), "1", ttl_s)
            .await?;
        Ok(())
    }

    async fn alive_workers(&self) -> Result<Vec<String>> {
        let mut client = self.client();
        let pattern = format!("{}*", keys::HEARTBEAT_PREFIX);
        let found = client.scan_keys(&pattern).await?;
        Ok(found
            .into_iter()
            .filter_map(|k| k.strip_prefix(keys::HEARTBEAT_PREFIX).map(str::to_string))
            .collect())
    }

    async fn acquire_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool> {
        let mut client = self.client();
        Ok(client.set_nx_px(key, owner, ttl_ms).await?)
    }

    async fn refresh_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool> {
        let mut client = self.client();
        let refreshed: i64 = self
            .refresh_lock
            .key(key)
            .arg(owner)
            .arg(ttl_ms)
            .invoke_async(client.connection_mut())
            .await?;
        Ok(refreshed == 1)
    }

    async fn stream_len(&self, priority: Priority) -> Result<u64> {
        let mut client = self.client();
        Ok(client.xlen(&keys::ready_stream(priority)).await?)
    }

    async fn parked_len(&self) -> Result<u64> {
        let mut client = self.client();
        Ok(client.zcard(keys::PARKED).await?)
    }

    async fn ping(&self) -> Result<()> {
        let mut client = self.client();
        client.ping().await?;
        Ok(())
    }
}
