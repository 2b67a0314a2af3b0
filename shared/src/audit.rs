// ============================================================================
// Audit Trail
// ============================================================================
//
// Every job carries an audit record from enqueue to its terminal state:
// which service submitted it, through which endpoint, and how it ended.
// Audit writes after enqueue are best-effort - a failed write is logged and
// never surfaces into the delivery path.
//
// ============================================================================

use crate::queue::QueueStore;
use anyhow::{Context, Result};
use chrono::Utc;
use courier_config::AUDIT_TTL_S;
use courier_types::{AuditRecord, EmailJob, JobStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn QueueStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// The record written (atomically with the job) at enqueue time.
    pub fn queued_record(job: &EmailJob, endpoint: &str) -> AuditRecord {
        AuditRecord {
            job_id: job.job_id.clone(),
            submitted_by: job.submitted_by.clone(),
            endpoint: endpoint.to_string(),
            submitted_at: job.submitted_at,
            template: job.template.clone(),
            recipient_count: job.recipients.len(),
            final_status: JobStatus::Queued,
            attempt_count: 0,
            last_error: None,
        }
    }

    /// Merge a terminal transition into the job's record. Best-effort: any
    /// failure is logged and swallowed.
    pub async fn record_terminal(
        &self,
        job: &EmailJob,
        status: JobStatus,
        last_error: Option<&str>,
    ) {
        if let Err(e) = self.try_record_terminal(job, status, last_error).await {
            warn!(
                job_id = %job.job_id,
                status = %status.as_str(),
                error = %e,
                "Failed to write audit record (non-fatal)"
            );
        }
    }

    async fn try_record_terminal(
        &self,
        job: &EmailJob,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        // Merge over the enqueue-time record when it still exists
        let mut record = match self.store.get_audit(&job.job_id).await? {
            Some(json) => serde_json::from_str::<AuditRecord>(&json)
                .unwrap_or_else(|_| Self::queued_record(job, "unknown")),
            None => Self::queued_record(job, "unknown"),
        };

        record.final_status = status;
        record.attempt_count = job.attempt_count;
        record.last_error = last_error.map(str::to_string);

        let json = serde_json::to_string(&record).context("Failed to serialize audit record")?;
        self.store
            .put_audit(&job.job_id, &json, AUDIT_TTL_S)
            .await
            .context("Failed to persist audit record")?;
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<AuditRecord>> {
        match self.store.get_audit(job_id).await? {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    /// Per-service counters collected at enqueue: total_calls, total_emails
    /// and per-endpoint call counts.
    pub async fn service_metrics(&self, service: &str) -> Result<ServiceMetrics> {
        let raw = self.store.get_service_metrics(service).await?;

        let mut endpoints = HashMap::new();
        for (key, value) in &raw {
            if let Some(endpoint) = key.strip_prefix("endpoint:") {
                endpoints.insert(endpoint.to_string(), *value);
            }
        }

        Ok(ServiceMetrics {
            total_calls: raw.get("total_calls").copied().unwrap_or(0),
            total_emails: raw.get("total_emails").copied().unwrap_or(0),
            endpoints,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ServiceMetrics {
    pub total_calls: i64,
    pub total_emails: i64,
    pub endpoints: HashMap<String, i64>,
}

/// Convenience for timestamps used in audit-adjacent keys.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
