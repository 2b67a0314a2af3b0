// ============================================================================
// In-Memory Queue Store
// ============================================================================
//
// Process-local implementation of the queue store with the same delivery,
// pending and reclaim semantics as the Redis implementation. Backs the
// engine test-suite; never used in production.
//
// ============================================================================

use crate::queue::store::{BucketState, EnqueueOutcome, PendingEntry, QueueEntry, QueueStore};
use anyhow::Result;
use async_trait::async_trait;
use courier_types::{Priority, ProviderKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    entry_id: String,
    job_id: String,
    payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    cursor: u64,
    pending: HashMap<String, Pending>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: BTreeMap<u64, Entry>,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn append(&mut self, job_id: &str, payload: &[u8]) -> String {
        self.next_seq += 1;
        let seq = self.next_seq;
        let entry_id = format!("{seq}-0");
        self.entries.insert(
            seq,
            Entry {
                seq,
                entry_id: entry_id.clone(),
                job_id: job_id.to_string(),
                payload: payload.to_vec(),
            },
        );
        entry_id
    }

    fn deliver(&mut self, group: &str, consumer: &str, max: usize) -> Vec<Entry> {
        let state = self.groups.entry(group.to_string()).or_default();
        let mut delivered = Vec::new();
        for (&seq, entry) in self.entries.range(state.cursor + 1..) {
            if delivered.len() >= max {
                break;
            }
            state.pending.insert(
                entry.entry_id.clone(),
                Pending {
                    seq,
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    delivery_count: 1,
                },
            );
            delivered.push(entry.clone());
        }
        if let Some(last) = delivered.last() {
            state.cursor = last.seq;
        }
        delivered
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<Priority, StreamState>,
    parked: BTreeMap<(i64, String), ()>,
    parked_payload: HashMap<String, (Priority, Vec<u8>)>,
    dedup: HashSet<String>,
    dlq: HashMap<String, String>,
    counters: HashMap<String, i64>,
    audit: HashMap<String, String>,
    service_metrics: HashMap<String, HashMap<String, i64>>,
    buckets: HashMap<ProviderKind, BucketState>,
    heartbeats: HashMap<String, Instant>,
    locks: HashMap<String, (String, Instant)>,
}

#[derive(Default)]
pub struct MemoryQueueStore {
    state: Mutex<State>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("memory store poisoned");
        f(&mut state)
    }

    fn record_service_call(
        state: &mut State,
        service: &str,
        endpoint: &str,
        recipient_count: usize,
    ) {
        let metrics = state.service_metrics.entry(service.to_string()).or_default();
        *metrics.entry("total_calls".to_string()).or_default() += 1;
        *metrics.entry("total_emails".to_string()).or_default() += recipient_count as i64;
        *metrics.entry(format!("endpoint:{endpoint}")).or_default() += 1;
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue_ready(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        audit_json: &str,
        service: &str,
        endpoint: &str,
        recipient_count: usize,
        _now_ms: i64,
    ) -> Result<EnqueueOutcome> {
        self.with(|state| {
            if !state.dedup.insert(job_id.to_string()) {
                return Ok(EnqueueOutcome::Duplicate);
            }
            let stream = state.streams.entry(priority).or_default();
            let entry_id = stream.append(job_id, payload);
            let depth = stream.entries.len() as u64;
            state.audit.insert(job_id.to_string(), audit_json.to_string());
            Self::record_service_call(state, service, endpoint, recipient_count);
            Ok(EnqueueOutcome::Queued { entry_id, depth })
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
        _now_ms: i64,
    ) -> Result<EnqueueOutcome> {
        self.with(|state| {
            if !state.dedup.insert(job_id.to_string()) {
                return Ok(EnqueueOutcome::Duplicate);
            }
            state.parked.insert((due_ms, job_id.to_string()), ());
            state
                .parked_payload
                .insert(job_id.to_string(), (priority, payload.to_vec()));
            state.audit.insert(job_id.to_string(), audit_json.to_string());
            Self::record_service_call(state, service, endpoint, recipient_count);
            Ok(EnqueueOutcome::Parked)
        })
    }

    async fn append(&self, priority: Priority, job_id: &str, payload: &[u8]) -> Result<String> {
        Ok(self.with(|state| {
            state
                .streams
                .entry(priority)
                .or_default()
                .append(job_id, payload)
        }))
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        priorities: &[Priority],
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueEntry>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            let delivered = self.with(|state| {
                for &priority in priorities {
                    let stream = state.streams.entry(priority).or_default();
                    let entries = stream.deliver(group, consumer, max);
                    if !entries.is_empty() {
                        return entries
                            .into_iter()
                            .map(|e| QueueEntry {
                                priority,
                                entry_id: e.entry_id,
                                job_id: e.job_id,
                                payload: e.payload,
                            })
                            .collect();
                    }
                }
                Vec::new()
            });

            if !delivered.is_empty() || Instant::now() >= deadline {
                return Ok(delivered);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, priority: Priority, group: &str, entry_id: &str) -> Result<()> {
        self.with(|state| {
            let stream = state.streams.entry(priority).or_default();
            if let Some(group_state) = stream.groups.get_mut(group) {
                if let Some(pending) = group_state.pending.remove(entry_id) {
                    stream.entries.remove(&pending.seq);
                }
            }
        });
        Ok(())
    }

    async fn pending(&self, priority: Priority, group: &str) -> Result<Vec<PendingEntry>> {
        Ok(self.with(|state| {
            let stream = state.streams.entry(priority).or_default();
            let Some(group_state) = stream.groups.get(group) else {
                return Vec::new();
            };
            group_state
                .pending
                .iter()
                .map(|(entry_id, p)| PendingEntry {
                    entry_id: entry_id.clone(),
                    consumer: p.consumer.clone(),
                    idle_ms: p.delivered_at.elapsed().as_millis() as u64,
                    delivery_count: p.delivery_count,
                })
                .collect()
        }))
    }

    async fn claim(
        &self,
        priority: Priority,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        entry_ids: &[String],
    ) -> Result<Vec<QueueEntry>> {
        Ok(self.with(|state| {
            let stream = state.streams.entry(priority).or_default();
            let Some(group_state) = stream.groups.get_mut(group) else {
                return Vec::new();
            };

            let mut claimed = Vec::new();
            for entry_id in entry_ids {
                let Some(pending) = group_state.pending.get_mut(entry_id) else {
                    continue;
                };
                if pending.delivered_at.elapsed().as_millis() < min_idle_ms as u128 {
                    continue;
                }
                let Some(entry) = stream.entries.get(&pending.seq) else {
                    group_state.pending.remove(entry_id);
                    continue;
                };
                pending.consumer = consumer.to_string();
                pending.delivered_at = Instant::now();
                pending.delivery_count += 1;
                claimed.push(QueueEntry {
                    priority,
                    entry_id: entry.entry_id.clone(),
                    job_id: entry.job_id.clone(),
                    payload: entry.payload.clone(),
                });
            }
            claimed
        }))
    }

    async fn park(
        &self,
        priority: Priority,
        job_id: &str,
        payload: &[u8],
        due_ms: i64,
    ) -> Result<()> {
        self.with(|state| {
            state.parked.insert((due_ms, job_id.to_string()), ());
            state
                .parked_payload
                .insert(job_id.to_string(), (priority, payload.to_vec()));
        });
        Ok(())
    }

    async fn promote_due(&self, now_ms: i64, limit: usize) -> Result<Vec<String>> {
        Ok(self.with(|state| {
            let due: Vec<(i64, String)> = state
                .parked
                .range(..=(now_ms, String::from("\u{10FFFF}")))
                .take(limit)
                .map(|((due_ms, job_id), _)| (*due_ms, job_id.clone()))
                .collect();

            let mut promoted = Vec::new();
            for (due_ms, job_id) in due {
                state.parked.remove(&(due_ms, job_id.clone()));
                if let Some((priority, payload)) = state.parked_payload.remove(&job_id) {
                    state
                        .streams
                        .entry(priority)
                        .or_default()
                        .append(&job_id, &payload);
                    promoted.push(job_id);
                }
            }
            promoted
        }))
    }

    async fn dead_letter(&self, job_id: &str, entry_json: &str) -> Result<()> {
        self.with(|state| {
            state.dlq.insert(job_id.to_string(), entry_json.to_string());
        });
        Ok(())
    }

    async fn dlq_get(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self.with(|state| state.dlq.get(job_id).cloned()))
    }

    async fn dlq_len(&self) -> Result<u64> {
        Ok(self.with(|state| state.dlq.len() as u64))
    }

    async fn incr_counter(&self, key: &str, delta: i64, _ttl_s: Option<u64>) -> Result<i64> {
        Ok(self.with(|state| {
            let counter = state.counters.entry(key.to_string()).or_default();
            *counter += delta;
            *counter
        }))
    }

    async fn get_counter(&self, key: &str) -> Result<i64> {
        Ok(self.with(|state| state.counters.get(key).copied().unwrap_or(0)))
    }

    async fn put_audit(&self, job_id: &str, record_json: &str, _ttl_s: u64) -> Result<()> {
        self.with(|state| {
            state
                .audit
                .insert(job_id.to_string(), record_json.to_string());
        });
        Ok(())
    }

    async fn get_audit(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self.with(|state| state.audit.get(job_id).cloned()))
    }

    async fn get_service_metrics(&self, service: &str) -> Result<HashMap<String, i64>> {
        Ok(self.with(|state| {
            state
                .service_metrics
                .get(service)
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn try_acquire(
        &self,
        provider: ProviderKind,
        requested: f64,
        capacity: f64,
        refill_per_sec: f64,
        now_ms: i64,
    ) -> Result<bool> {
        Ok(self.with(|state| {
            let bucket = state.buckets.entry(provider).or_insert(BucketState {
                tokens: capacity,
                last_refill_ms: now_ms,
            });

            let elapsed_ms = now_ms - bucket.last_refill_ms;
            if elapsed_ms > 0 {
                bucket.tokens =
                    capacity.min(bucket.tokens + (elapsed_ms as f64 / 1000.0) * refill_per_sec);
            }
            bucket.last_refill_ms = now_ms;

            if bucket.tokens >= requested {
                bucket.tokens -= requested;
                true
            } else {
                false
            }
        }))
    }

    async fn bucket_state(&self, provider: ProviderKind) -> Result<Option<BucketState>> {
        Ok(self.with(|state| state.buckets.get(&provider).copied()))
    }

    async fn heartbeat(&self, worker_id: &str, ttl_s: u64) -> Result<()> {
        self.with(|state| {
            state.heartbeats.insert(
                worker_id.to_string(),
                Instant::now() + Duration::from_secs(ttl_s),
            );
        });
        Ok(())
    }

    async fn alive_workers(&self) -> Result<Vec<String>> {
        Ok(self.with(|state| {
            let now = Instant::now();
            state.heartbeats.retain(|_, expiry| *expiry > now);
            state.heartbeats.keys().cloned().collect()
        }))
    }

    async fn acquire_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool> {
        Ok(self.with(|state| {
            let now = Instant::now();
            match state.locks.get(key) {
                Some((_, expiry)) if *expiry > now => false,
                _ => {
                    state.locks.insert(
                        key.to_string(),
                        (owner.to_string(), now + Duration::from_millis(ttl_ms)),
                    );
                    true
                }
            }
        }))
    }

    async fn refresh_lock(&self, key: &str, owner: &str, ttl_ms: u64) -> Result<bool> {
        Ok(self.with(|state| {
            let now = Instant::now();
            match state.locks.get_mut(key) {
                Some((held_by, expiry)) if held_by == owner && *expiry > now => {
                    *expiry = now + Duration::from_millis(ttl_ms);
                    true
                }
                _ => false,
            }
        }))
    }

    async fn stream_len(&self, priority: Priority) -> Result<u64> {
        Ok(self.with(|state| {
            state
                .streams
                .get(&priority)
                .map(|s| s.entries.len() as u64)
                .unwrap_or(0)
        }))
    }

    async fn parked_len(&self) -> Result<u64> {
        Ok(self.with(|state| state.parked.len() as u64))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_delivers_each_entry_to_one_consumer() {
        let store = MemoryQueueStore::new();
        store.append(Priority::High, "job-1", b"a").await.unwrap();
        store.append(Priority::High, "job-2", b"b").await.unwrap();

        let first = store
            .read_group("g", "worker-a", &[Priority::High], 1, 0)
            .await
            .unwrap();
        let second = store
            .read_group("g", "worker-b", &[Priority::High], 1, 0)
            .await
            .unwrap();

        assert_eq!(first[0].job_id, "job-1");
        assert_eq!(second[0].job_id, "job-2");
    }

    #[tokio::test]
    async fn ack_removes_entry_and_pending() {
        let store = MemoryQueueStore::new();
        store.append(Priority::Medium, "job-1", b"a").await.unwrap();

        let entries = store
            .read_group("g", "w", &[Priority::Medium], 1, 0)
            .await
            .unwrap();
        store
            .ack(Priority::Medium, "g", &entries[0].entry_id)
            .await
            .unwrap();

        assert_eq!(store.stream_len(Priority::Medium).await.unwrap(), 0);
        assert!(store.pending(Priority::Medium, "g").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_respects_min_idle_and_bumps_delivery_count() {
        let store = MemoryQueueStore::new();
        store.append(Priority::Low, "job-1", b"a").await.unwrap();
        let entries = store
            .read_group("g", "dead-worker", &[Priority::Low], 1, 0)
            .await
            .unwrap();
        let id = entries[0].entry_id.clone();

        // Too fresh to claim
        let claimed = store
            .claim(Priority::Low, "g", "rescuer", 60_000, &[id.clone()])
            .await
            .unwrap();
        assert!(claimed.is_empty());

        let claimed = store
            .claim(Priority::Low, "g", "rescuer", 0, &[id])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = store.pending(Priority::Low, "g").await.unwrap();
        assert_eq!(pending[0].consumer, "rescuer");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn promote_moves_due_jobs_only() {
        let store = MemoryQueueStore::new();
        store
            .park(Priority::High, "due", b"a", 1_000)
            .await
            .unwrap();
        store
            .park(Priority::High, "future", b"b", 2_000)
            .await
            .unwrap();

        let promoted = store.promote_due(1_500, 10).await.unwrap();
        assert_eq!(promoted, vec!["due".to_string()]);
        assert_eq!(store.parked_len().await.unwrap(), 1);
        assert_eq!(store.stream_len(Priority::High).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn token_bucket_refills_continuously_and_caps() {
        let store = MemoryQueueStore::new();
        let acquire = |now_ms| store.try_acquire(ProviderKind::Smtp, 1.0, 2.0, 1.0, now_ms);

        assert!(acquire(0).await.unwrap());
        assert!(acquire(0).await.unwrap());
        // Bucket empty
        assert!(!acquire(0).await.unwrap());
        // 1 token/s: after 1s exactly one more acquire fits
        assert!(acquire(1_000).await.unwrap());
        assert!(!acquire(1_000).await.unwrap());
        // Long idle refills to capacity, never beyond
        assert!(acquire(100_000).await.unwrap());
        assert!(acquire(100_000).await.unwrap());
        assert!(!acquire(100_000).await.unwrap());
    }
}
