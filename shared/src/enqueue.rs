// ============================================================================
// Enqueuer
// ============================================================================
//
// Accepts a validated job, decides ready-vs-parked, and lands the job, its
// audit record and the per-service counters in one atomic store operation.
// A job is either fully enqueued or not enqueued at all.
//
// ============================================================================

use crate::audit::{now_ms, AuditTrail};
use crate::queue::{EnqueueOutcome, QueueStore};
use chrono::Utc;
use courier_error::{AppError, AppResult};
use courier_metrics::EMAILS_TOTAL;
use courier_types::EmailJob;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReceipt {
    pub job_id: String,
    pub status: &'static str,
    /// Ready-stream length observed at enqueue; 0 for parked jobs.
    pub queue_position: u64,
}

#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn QueueStore>,
}

impl Enqueuer {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Persist a job. `endpoint` labels the ingress route for the audit
    /// trail and per-service metrics.
    pub async fn enqueue(&self, job: &EmailJob, endpoint: &str) -> AppResult<EnqueueReceipt> {
        let payload = rmp_serde::to_vec_named(job)
            .map_err(|e| AppError::internal(format!("failed to serialize job: {e}")))?;

        let audit_json = serde_json::to_string(&AuditTrail::queued_record(job, endpoint))?;

        // Strictly-future timestamps park; `scheduled_for == now` goes ready
        let parked_due = job
            .scheduled_for
            .filter(|at| *at > Utc::now())
            .map(|at| at.timestamp_millis());

        let outcome = match parked_due {
            Some(due_ms) => self
                .store
                .enqueue_parked(
                    job.priority,
                    &job.job_id,
                    &payload,
                    due_ms,
                    &audit_json,
                    &job.submitted_by,
                    endpoint,
                    job.recipients.len(),
                    now_ms(),
                )
                .await,
            None => self
                .store
                .enqueue_ready(
                    job.priority,
                    &job.job_id,
                    &payload,
                    &audit_json,
                    &job.submitted_by,
                    endpoint,
                    job.recipients.len(),
                    now_ms(),
                )
                .await,
        }
        .map_err(|e| AppError::store(e.to_string()))?;

        EMAILS_TOTAL
            .with_label_values(&["queued", job.priority.as_str(), job.provider.as_str()])
            .inc();

        match outcome {
            EnqueueOutcome::Queued { depth, .. } => {
                info!(
                    job_id = %job.job_id,
                    priority = %job.priority,
                    provider = %job.provider,
                    recipients = job.recipients.len(),
                    service = %job.submitted_by,
                    "Email queued"
                );
                Ok(EnqueueReceipt {
                    job_id: job.job_id.clone(),
                    status: "queued",
                    queue_position: depth,
                })
            }
            EnqueueOutcome::Parked => {
                info!(
                    job_id = %job.job_id,
                    scheduled_for = ?job.scheduled_for,
                    "Email scheduled for future delivery"
                );
                Ok(EnqueueReceipt {
                    job_id: job.job_id.clone(),
                    status: "queued",
                    queue_position: 0,
                })
            }
            EnqueueOutcome::Duplicate => Err(AppError::validation(format!(
                "job {} was already enqueued",
                job.job_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use courier_types::{Priority, ProviderKind};
    use std::collections::HashMap;

    fn job(scheduled_for: Option<chrono::DateTime<Utc>>) -> EmailJob {
        EmailJob::new(
            vec!["a@example.com".into()],
            "welcome".into(),
            HashMap::new(),
            None,
            Priority::High,
            ProviderKind::Smtp,
            scheduled_for,
            "main-app".into(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ready_job_lands_on_its_stream_only() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let receipt = enqueuer.enqueue(&job(None), "/send").await.unwrap();
        assert_eq!(receipt.status, "queued");
        assert_eq!(receipt.queue_position, 1);

        assert_eq!(store.stream_len(Priority::High).await.unwrap(), 1);
        assert_eq!(store.stream_len(Priority::Medium).await.unwrap(), 0);
        assert_eq!(store.parked_len().await.unwrap(), 0);
        assert_eq!(store.dlq_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn future_job_parks() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let at = Utc::now() + chrono::Duration::hours(1);
        enqueuer.enqueue(&job(Some(at)), "/send").await.unwrap();

        assert_eq!(store.parked_len().await.unwrap(), 1);
        assert_eq!(store.stream_len(Priority::High).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn past_schedule_goes_straight_to_ready() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let at = Utc::now() - chrono::Duration::seconds(1);
        enqueuer.enqueue(&job(Some(at)), "/send").await.unwrap();

        assert_eq!(store.parked_len().await.unwrap(), 0);
        assert_eq!(store.stream_len(Priority::High).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn same_request_twice_yields_two_jobs() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());

        let first = enqueuer.enqueue(&job(None), "/send").await.unwrap();
        let second = enqueuer.enqueue(&job(None), "/send").await.unwrap();

        assert_ne!(first.job_id, second.job_id);
        assert_eq!(store.stream_len(Priority::High).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn audit_and_service_counters_written_at_enqueue() {
        let store = Arc::new(MemoryQueueStore::new());
        let enqueuer = Enqueuer::new(store.clone());
        let audit = AuditTrail::new(store.clone());

        let job = job(None);
        enqueuer.enqueue(&job, "/send").await.unwrap();

        let record = audit.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(record.final_status, courier_types::JobStatus::Queued);
        assert_eq!(record.endpoint, "/send");

        let metrics = audit.service_metrics("main-app").await.unwrap();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.total_emails, 1);
        assert_eq!(metrics.endpoints.get("/send"), Some(&1));
    }
}
