// ============================================================================
// Retry / Dead-Letter Controller
// ============================================================================
//
// Owns every attempt-count mutation. A retriable failure bumps the counter
// and parks the job with an exponential, jittered delay; the scheduler
// brings it back. At MAX_ATTEMPTS the job moves to the DLQ instead. Worker
// crashes never pass through here - a reclaimed delivery keeps its counter.
//
// ============================================================================

use crate::audit::{now_ms, AuditTrail};
use crate::keys;
use crate::queue::QueueStore;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use courier_config::{Config, DAILY_COUNTER_TTL_S};
use courier_metrics::EMAILS_TOTAL;
use courier_types::{DeadLetterEntry, EmailJob, JobStatus, Priority};
use rand::Rng;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct RetryController {
    store: Arc<dyn QueueStore>,
    config: Arc<Config>,
    audit: AuditTrail,
}

impl RetryController {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<Config>) -> Self {
        let audit = AuditTrail::new(store.clone());
        Self {
            store,
            config,
            audit,
        }
    }

    /// Handle one retriable failure: schedule a delayed retry, or
    /// dead-letter the job once its attempts are spent.
    pub async fn on_retriable_failure(
        &self,
        job: &mut EmailJob,
        priority: Priority,
        entry_id: &str,
        reason: &str,
    ) -> Result<()> {
        job.attempt_count += 1;
        job.last_error = Some(reason.to_string());

        if job.attempt_count >= self.config.worker.max_attempts {
            return self.dead_letter(job, priority, entry_id, reason).await;
        }

        let delay_ms = retry_delay_ms(
            self.config.worker.base_retry_delay_s,
            job.attempt_count,
            &mut rand::thread_rng(),
        );
        let due_ms = now_ms() + delay_ms as i64;
        job.scheduled_for = Utc.timestamp_millis_opt(due_ms).single();

        let payload = rmp_serde::to_vec_named(job).context("Failed to serialize job for retry")?;
        self.store
            .park(priority, &job.job_id, &payload, due_ms)
            .await
            .context("Failed to park job for retry")?;
        self.store
            .ack(priority, keys::CONSUMER_GROUP, entry_id)
            .await
            .context("Failed to ack entry after scheduling retry")?;

        EMAILS_TOTAL
            .with_label_values(&["retried", priority.as_str(), job.provider.as_str()])
            .inc();
        warn!(
            job_id = %job.job_id,
            attempt = job.attempt_count,
            max_attempts = self.config.worker.max_attempts,
            delay_ms = delay_ms,
            reason = %reason,
            "Dispatch failed, retry scheduled"
        );
        Ok(())
    }

    /// Terminal failure: serialize the job into the DLQ, ack the origin
    /// entry, record the audit transition and bump the failure counters.
    pub async fn dead_letter(
        &self,
        job: &EmailJob,
        priority: Priority,
        entry_id: &str,
        reason: &str,
    ) -> Result<()> {
        let entry = DeadLetterEntry {
            job_id: job.job_id.clone(),
            job: job.clone(),
            failure_reason: reason.to_string(),
            final_attempt_count: job.attempt_count,
            dead_lettered_at: Utc::now().timestamp(),
        };
        let entry_json =
            serde_json::to_string(&entry).context("Failed to serialize dead letter entry")?;

        self.store
            .dead_letter(&job.job_id, &entry_json)
            .await
            .context("Failed to write dead letter entry")?;
        self.store
            .ack(priority, keys::CONSUMER_GROUP, entry_id)
            .await
            .context("Failed to ack dead-lettered entry")?;

        self.bump_failed_counters().await;
        self.audit
            .record_terminal(job, JobStatus::FailedPermanent, Some(reason))
            .await;

        EMAILS_TOTAL
            .with_label_values(&["failed", priority.as_str(), job.provider.as_str()])
            .inc();
        error!(
            job_id = %job.job_id,
            attempt_count = job.attempt_count,
            reason = %reason,
            "Job dead-lettered"
        );
        Ok(())
    }

    async fn bump_failed_counters(&self) {
        if let Err(e) = self.store.incr_counter(keys::STATS_FAILED, 1, None).await {
            warn!(error = %e, "Failed to bump failure counter (non-fatal)");
        }
        let daily = keys::stats_daily(keys::STATS_FAILED, Utc::now());
        if let Err(e) = self
            .store
            .incr_counter(&daily, 1, Some(DAILY_COUNTER_TTL_S))
            .await
        {
            warn!(error = %e, "Failed to bump daily failure counter (non-fatal)");
        }
    }
}

/// Exponential backoff with +/-20% jitter: base * 2^(attempt-1).
fn retry_delay_ms(base_delay_s: u64, attempt_count: u32, rng: &mut impl Rng) -> u64 {
    let exponent = attempt_count.saturating_sub(1).min(16);
    let base_ms = base_delay_s.saturating_mul(1000).saturating_mul(1u64 << exponent);
    let jitter = rng.gen_range(0.8..=1.2);
    (base_ms as f64 * jitter) as u64
}
