// ============================================================================
// Provider Rate Gate
// ============================================================================
//
// One token bucket per provider, shared by all worker processes through the
// queue store. The check-and-consume is a single server-side script; this
// module adds the soft wait: on refusal the worker sleeps 50-500 ms with
// jitter and re-acquires, bounded by RATE_WAIT_MAX_S. Exhausting the wait is
// not a send failure by itself - the caller converts it into a transient
// retry.
//
// ============================================================================

use crate::queue::QueueStore;
use anyhow::Result;
use courier_config::Config;
use courier_metrics::RATE_LIMITED_TOTAL;
use courier_types::ProviderKind;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BACKOFF_MIN_MS: u64 = 50;
const BACKOFF_MAX_MS: u64 = 500;

#[derive(Clone)]
pub struct RateGate {
    store: Arc<dyn QueueStore>,
    config: Arc<Config>,
}

impl RateGate {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Single atomic check-and-consume against the shared bucket.
    pub async fn try_acquire(&self, provider: ProviderKind, tokens: f64) -> Result<bool> {
        let bucket = self.config.providers.bucket(provider);
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.store
            .try_acquire(
                provider,
                tokens,
                bucket.capacity,
                bucket.refill_per_sec,
                now_ms,
            )
            .await
    }

    /// Acquire with the jittered soft wait. Returns false when
    /// RATE_WAIT_MAX_S elapsed without a token.
    pub async fn acquire(&self, provider: ProviderKind, tokens: f64) -> Result<bool> {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.worker.rate_wait_max_s);

        loop {
            if self.try_acquire(provider, tokens).await? {
                return Ok(true);
            }

            RATE_LIMITED_TOTAL
                .with_label_values(&[provider.as_str()])
                .inc();

            if Instant::now() >= deadline {
                warn!(
                    provider = %provider,
                    wait_max_s = self.config.worker.rate_wait_max_s,
                    "Rate bucket wait exhausted"
                );
                return Ok(false);
            }

            let backoff_ms = rand::thread_rng().gen_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS);
            debug!(
                provider = %provider,
                backoff_ms = backoff_ms,
                "Rate bucket empty, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use courier_config::RateBucket;

    fn gate(capacity: f64, refill_per_sec: f64, wait_max_s: u64) -> RateGate {
        let mut config = Config::test_defaults();
        config.worker.rate_wait_max_s = wait_max_s;
        config.providers.set_bucket(
            ProviderKind::Smtp,
            RateBucket {
                capacity,
                refill_per_sec,
            },
        );
        RateGate::new(Arc::new(MemoryQueueStore::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn consumes_up_to_capacity() {
        let gate = gate(2.0, 0.0, 0);
        assert!(gate.try_acquire(ProviderKind::Smtp, 1.0).await.unwrap());
        assert!(gate.try_acquire(ProviderKind::Smtp, 1.0).await.unwrap());
        assert!(!gate.try_acquire(ProviderKind::Smtp, 1.0).await.unwrap());
    }

    #[tokio::test]
    async fn empty_bucket_with_refill_recovers_within_a_refill_period() {
        // capacity 1, 10 tokens/s: an empty bucket yields a token within
        // ~100ms, well inside the wait budget
        let gate = gate(1.0, 10.0, 5);
        assert!(gate.acquire(ProviderKind::Smtp, 1.0).await.unwrap());

        let started = Instant::now();
        assert!(gate.acquire(ProviderKind::Smtp, 1.0).await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_refill_exhausts_the_wait() {
        let gate = gate(0.0, 0.0, 0);
        assert!(!gate.acquire(ProviderKind::Smtp, 1.0).await.unwrap());
    }
}
