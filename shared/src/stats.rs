// ============================================================================
// Stats / Health Aggregation
// ============================================================================
//
// Read-only view over the queue store: stream depths, DLQ and parked sizes,
// rolling counters, provider bucket state and worker liveness. Also refreshes
// the corresponding Prometheus gauges so /metrics and /stats agree.
//
// ============================================================================

use crate::keys;
use crate::queue::QueueStore;
use anyhow::Result;
use chrono::Utc;
use courier_config::Config;
use courier_metrics::{DLQ_SIZE, PARKED_SIZE, QUEUE_DEPTH};
use courier_types::{Priority, ProviderKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct QueueDepths {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub parked: u64,
    pub dead_letter: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub queues: QueueDepths,
    pub sent_total: i64,
    pub failed_total: i64,
    pub sent_today: i64,
    pub failed_today: i64,
    pub rate_buckets: HashMap<String, BucketSnapshot>,
    pub workers_alive: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Healthiness {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: Healthiness,
    pub queue_store_connected: bool,
    pub workers_alive: usize,
}

#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn QueueStore>,
    config: Arc<Config>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot> {
        let high = self.store.stream_len(Priority::High).await?;
        let medium = self.store.stream_len(Priority::Medium).await?;
        let low = self.store.stream_len(Priority::Low).await?;
        let parked = self.store.parked_len().await?;
        let dead_letter = self.store.dlq_len().await?;

        QUEUE_DEPTH.with_label_values(&["high"]).set(high as f64);
        QUEUE_DEPTH.with_label_values(&["medium"]).set(medium as f64);
        QUEUE_DEPTH.with_label_values(&["low"]).set(low as f64);
        DLQ_SIZE.set(dead_letter as i64);
        PARKED_SIZE.set(parked as i64);

        let today = Utc::now();
        let sent_total = self.store.get_counter(keys::STATS_SENT).await?;
        let failed_total = self.store.get_counter(keys::STATS_FAILED).await?;
        let sent_today = self
            .store
            .get_counter(&keys::stats_daily(keys::STATS_SENT, today))
            .await?;
        let failed_today = self
            .store
            .get_counter(&keys::stats_daily(keys::STATS_FAILED, today))
            .await?;

        let mut rate_buckets = HashMap::new();
        for kind in ProviderKind::ALL {
            let bucket = self.config.providers.bucket(kind);
            let observed = self.store.bucket_state(kind).await?;
            rate_buckets.insert(
                kind.as_str().to_string(),
                BucketSnapshot {
                    // An untouched bucket is implicitly full
                    tokens: observed.map(|b| b.tokens).unwrap_or(bucket.capacity),
                    capacity: bucket.capacity,
                    refill_per_sec: bucket.refill_per_sec,
                },
            );
        }

        let workers_alive = self.store.alive_workers().await?;

        Ok(StatsSnapshot {
            queues: QueueDepths {
                high,
                medium,
                low,
                parked,
                dead_letter,
            },
            sent_total,
            failed_total,
            sent_today,
            failed_today,
            rate_buckets,
            workers_alive,
        })
    }

    /// Healthy iff the store answers and at least one worker heartbeat is
    /// fresh.
    pub async fn health(&self) -> HealthStatus {
        let queue_store_connected = self.store.ping().await.is_ok();
        let workers_alive = if queue_store_connected {
            self.store.alive_workers().await.map(|w| w.len()).unwrap_or(0)
        } else {
            0
        };

        let status = if queue_store_connected && workers_alive > 0 {
            Healthiness::Healthy
        } else {
            Healthiness::Degraded
        };

        HealthStatus {
            status,
            queue_store_connected,
            workers_alive,
        }
    }
}
