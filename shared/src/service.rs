// ============================================================================
// Email Service Facade
// ============================================================================
//
// The seam between the HTTP ingress and the engine: request validation, job
// construction, enqueue, stats and health. The ingress adapter never touches
// the queue store directly.
//
// ============================================================================

use crate::audit::AuditTrail;
use crate::auth::ServiceIdentity;
use crate::enqueue::{EnqueueReceipt, Enqueuer};
use crate::queue::QueueStore;
use crate::stats::{HealthStatus, StatsAggregator, StatsSnapshot};
use chrono::{DateTime, Utc};
use courier_config::Config;
use courier_error::AppResult;
use courier_types::{AuditRecord, EmailJob, Priority, ProviderKind};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Body of POST /send.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub recipients: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Overrides the route path as the audit endpoint label.
    #[serde(default)]
    pub endpoint_label: Option<String>,
}

#[derive(Clone)]
pub struct EmailService {
    config: Arc<Config>,
    enqueuer: Enqueuer,
    stats: StatsAggregator,
    audit: AuditTrail,
}

impl EmailService {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<Config>) -> Self {
        Self {
            enqueuer: Enqueuer::new(store.clone()),
            stats: StatsAggregator::new(store.clone(), config.clone()),
            audit: AuditTrail::new(store),
            config,
        }
    }

    /// Validate a request, build the job and enqueue it. Validation failures
    /// surface synchronously; the job is never persisted on that path.
    pub async fn enqueue(
        &self,
        request: EnqueueRequest,
        identity: &ServiceIdentity,
        endpoint: &str,
    ) -> AppResult<EnqueueReceipt> {
        let endpoint = request
            .endpoint_label
            .clone()
            .unwrap_or_else(|| endpoint.to_string());

        let job = EmailJob::new(
            request.recipients,
            request.template,
            request.context,
            request.subject,
            request.priority.unwrap_or_default(),
            request.provider.unwrap_or(self.config.default_provider),
            request.scheduled_for,
            identity.name.clone(),
        )?;

        debug!(
            job_id = %job.job_id,
            service = %identity.name,
            endpoint = %endpoint,
            "Enqueue request accepted"
        );

        self.enqueuer.enqueue(&job, &endpoint).await
    }

    pub async fn stats(&self) -> AppResult<StatsSnapshot> {
        self.stats
            .snapshot()
            .await
            .map_err(|e| courier_error::AppError::store(e.to_string()))
    }

    pub async fn health(&self) -> HealthStatus {
        self.stats.health().await
    }

    pub async fn job_audit(&self, job_id: &str) -> AppResult<Option<AuditRecord>> {
        self.audit
            .get(job_id)
            .await
            .map_err(|e| courier_error::AppError::store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueStore;
    use courier_error::AppError;

    fn service() -> EmailService {
        EmailService::new(
            Arc::new(MemoryQueueStore::new()),
            Arc::new(Config::test_defaults()),
        )
    }

    fn request(recipients: Vec<&str>) -> EnqueueRequest {
        EnqueueRequest {
            recipients: recipients.into_iter().map(str::to_string).collect(),
            template: "welcome".into(),
            context: HashMap::new(),
            subject: None,
            priority: None,
            provider: None,
            scheduled_for: None,
            endpoint_label: None,
        }
    }

    #[tokio::test]
    async fn empty_recipients_refused_synchronously() {
        let err = service()
            .enqueue(request(vec![]), &ServiceIdentity::anonymous(), "/send")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn malformed_recipient_refused() {
        let err = service()
            .enqueue(
                request(vec!["not-an-address"]),
                &ServiceIdentity::anonymous(),
                "/send",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn defaults_applied_and_identity_stamped() {
        let service = service();
        let receipt = service
            .enqueue(
                request(vec!["a@example.com"]),
                &ServiceIdentity::anonymous(),
                "/send",
            )
            .await
            .unwrap();

        let record = service.job_audit(&receipt.job_id).await.unwrap().unwrap();
        assert_eq!(record.submitted_by, "anonymous");
        assert_eq!(record.recipient_count, 1);
    }
}
