// ============================================================================
// Email Worker
// ============================================================================
//
// The central state machine. Each worker long-polls the priority streams
// through the shared consumer group (HIGH before MEDIUM before LOW on every
// poll), gates on the provider's rate bucket, renders the template, and
// dispatches through the driver set. Success acks; permanent failures
// dead-letter; transient failures go through the retry controller.
//
// A worker never lets a single bad job take the loop down: malformed
// payloads are acked and audited, store outages back off exponentially and
// keep retrying.
//
// ============================================================================

use crate::audit::AuditTrail;
use crate::keys;
use crate::providers::{DriverSet, OutboundEmail, SendOutcome};
use crate::queue::{QueueEntry, QueueStore};
use crate::rate_limit::RateGate;
use crate::render::{fallback_render, RenderedEmail, Renderer};
use crate::worker::RetryController;
use anyhow::Result;
use chrono::Utc;
use courier_config::{Config, AUDIT_TTL_S, DAILY_COUNTER_TTL_S};
use courier_metrics::{EMAILS_TOTAL, SEND_DURATION_SECONDS};
use courier_types::{AuditRecord, EmailJob, JobStatus, Priority};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How long one poll blocks when every stream is empty.
const POLL_BLOCK_MS: u64 = 5_000;

const STORE_BACKOFF_MIN: Duration = Duration::from_secs(1);
const STORE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Dependencies shared by every worker in the process.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn QueueStore>,
    pub config: Arc<Config>,
    pub drivers: Arc<DriverSet>,
    pub renderer: Arc<dyn Renderer>,
    /// Stable process identity; all consumers in this process share it.
    pub worker_id: String,
}

pub struct Worker {
    label: String,
    consumer: String,
    ctx: WorkerContext,
    gate: RateGate,
    retry: RetryController,
    audit: AuditTrail,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(label: impl Into<String>, ctx: WorkerContext, shutdown: watch::Receiver<bool>) -> Self {
        let gate = RateGate::new(ctx.store.clone(), ctx.config.clone());
        let retry = RetryController::new(ctx.store.clone(), ctx.config.clone());
        let audit = AuditTrail::new(ctx.store.clone());
        Self {
            label: label.into(),
            consumer: ctx.worker_id.clone(),
            ctx,
            gate,
            retry,
            audit,
            shutdown,
        }
    }

    /// Main loop. Returns Ok after observing the drain signal; the current
    /// in-flight job is always finished first.
    pub async fn run(&mut self) -> Result<()> {
        info!(worker = %self.label, consumer = %self.consumer, "Email worker started");
        let mut store_backoff = STORE_BACKOFF_MIN;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let mut shutdown = self.shutdown.clone();
            let read = tokio::select! {
                read = self.ctx.store.read_group(
                    keys::CONSUMER_GROUP,
                    &self.consumer,
                    &Priority::ALL,
                    1,
                    POLL_BLOCK_MS,
                ) => read,
                _ = shutdown.changed() => continue,
            };

            match read {
                Ok(entries) => {
                    store_backoff = STORE_BACKOFF_MIN;
                    for entry in entries {
                        self.process(entry).await;
                    }
                }
                Err(e) => {
                    error!(
                        worker = %self.label,
                        error = %e,
                        backoff_s = store_backoff.as_secs(),
                        "Queue store read failed, backing off"
                    );
                    tokio::time::sleep(store_backoff).await;
                    store_backoff = (store_backoff * 2).min(STORE_BACKOFF_MAX);
                }
            }
        }

        info!(worker = %self.label, "Email worker stopped");
        Ok(())
    }

    /// Process one delivered entry through the full state machine.
    pub async fn process(&self, entry: QueueEntry) {
        let mut job: EmailJob = match rmp_serde::from_slice(&entry.payload) {
            Ok(job) => job,
            Err(e) => {
                self.discard_malformed(&entry, &e.to_string()).await;
                return;
            }
        };

        debug!(
            worker = %self.label,
            job_id = %job.job_id,
            priority = %entry.priority,
            provider = %job.provider,
            attempt = job.attempt_count,
            "Processing job"
        );

        // Rate gate: a bucket squeeze is a soft wait, not a failure; only
        // exhausting the whole wait budget turns into a transient retry.
        let tokens = job.recipients.len() as f64;
        match self.gate.acquire(job.provider, tokens).await {
            Ok(true) => {}
            Ok(false) => {
                self.retriable(&mut job, &entry, "rate limit wait exhausted")
                    .await;
                return;
            }
            Err(e) => {
                self.retriable(&mut job, &entry, &format!("rate gate error: {e}"))
                    .await;
                return;
            }
        }

        // Render: best-effort, never fatal
        let rendered = self.render(&job);
        let email = OutboundEmail {
            from: self.ctx.config.from_email.clone(),
            recipients: job.recipients.clone(),
            subject: rendered
                .subject
                .or_else(|| job.subject.clone())
                .unwrap_or_else(|| "(no subject)".to_string()),
            html: rendered.html,
            text: rendered.text,
        };

        // Dispatch under the hard deadline
        let deadline = Duration::from_secs(self.ctx.config.worker.dispatch_timeout_s);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            deadline,
            self.ctx.drivers.dispatch(job.provider, &email),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::Transient(format!(
                "dispatch timed out after {}s",
                deadline.as_secs()
            )),
        };

        let elapsed = started.elapsed().as_secs_f64();

        // Conservative default when the driver could not classify:
        // retriable on the first attempt, permanent afterward
        let outcome = match outcome {
            SendOutcome::Unclassified(reason) if job.attempt_count == 0 => {
                SendOutcome::Transient(reason)
            }
            SendOutcome::Unclassified(reason) => SendOutcome::Permanent(reason),
            other => other,
        };

        match outcome {
            SendOutcome::Ok => {
                SEND_DURATION_SECONDS
                    .with_label_values(&[job.provider.as_str(), "ok"])
                    .observe(elapsed);
                self.sent(&job, &entry).await;
            }
            SendOutcome::Permanent(reason) => {
                SEND_DURATION_SECONDS
                    .with_label_values(&[job.provider.as_str(), "permanent"])
                    .observe(elapsed);
                if let Err(e) = self
                    .retry
                    .dead_letter(&job, entry.priority, &entry.entry_id, &reason)
                    .await
                {
                    error!(job_id = %job.job_id, error = %e, "Failed to dead-letter job");
                }
            }
            SendOutcome::Transient(reason) => {
                SEND_DURATION_SECONDS
                    .with_label_values(&[job.provider.as_str(), "transient"])
                    .observe(elapsed);
                self.retriable(&mut job, &entry, &reason).await;
            }
            SendOutcome::Unclassified(_) => unreachable!("resolved above"),
        }
    }

    fn render(&self, job: &EmailJob) -> RenderedEmail {
        match self.ctx.renderer.render(&job.template, &job.context) {
            Some(rendered) => rendered,
            None => {
                warn!(
                    job_id = %job.job_id,
                    template = %job.template,
                    "Template not found, using fallback body"
                );
                fallback_render(job)
            }
        }
    }

    async fn sent(&self, job: &EmailJob, entry: &QueueEntry) {
        if let Err(e) = self
            .ctx
            .store
            .ack(entry.priority, keys::CONSUMER_GROUP, &entry.entry_id)
            .await
        {
            // The entry stays pending and will be redelivered; the provider
            // send already happened, which at-least-once permits.
            error!(job_id = %job.job_id, error = %e, "Failed to ack sent job");
            return;
        }

        if let Err(e) = self.ctx.store.incr_counter(keys::STATS_SENT, 1, None).await {
            warn!(error = %e, "Failed to bump sent counter (non-fatal)");
        }
        let daily = keys::stats_daily(keys::STATS_SENT, Utc::now());
        if let Err(e) = self
            .ctx
            .store
            .incr_counter(&daily, 1, Some(DAILY_COUNTER_TTL_S))
            .await
        {
            warn!(error = %e, "Failed to bump daily sent counter (non-fatal)");
        }

        self.audit.record_terminal(job, JobStatus::Sent, None).await;

        EMAILS_TOTAL
            .with_label_values(&["sent", entry.priority.as_str(), job.provider.as_str()])
            .inc();
        info!(
            job_id = %job.job_id,
            provider = %job.provider,
            recipients = job.recipients.len(),
            attempt = job.attempt_count,
            "Email sent"
        );
    }

    async fn retriable(&self, job: &mut EmailJob, entry: &QueueEntry, reason: &str) {
        if let Err(e) = self
            .retry
            .on_retriable_failure(job, entry.priority, &entry.entry_id, reason)
            .await
        {
            // Leave the entry pending; redelivery will retry the whole step
            error!(job_id = %job.job_id, error = %e, "Retry handling failed");
        }
    }

    /// A payload that does not decode is acked and audited away; it can
    /// never succeed and must not wedge the stream.
    async fn discard_malformed(&self, entry: &QueueEntry, decode_error: &str) {
        error!(
            job_id = %entry.job_id,
            entry_id = %entry.entry_id,
            error = %decode_error,
            "Discarding malformed job payload"
        );

        if let Err(e) = self
            .ctx
            .store
            .ack(entry.priority, keys::CONSUMER_GROUP, &entry.entry_id)
            .await
        {
            error!(entry_id = %entry.entry_id, error = %e, "Failed to ack malformed entry");
            return;
        }

        let record = AuditRecord {
            job_id: entry.job_id.clone(),
            submitted_by: "unknown".to_string(),
            endpoint: "unknown".to_string(),
            submitted_at: Utc::now(),
            template: String::new(),
            recipient_count: 0,
            final_status: JobStatus::Malformed,
            attempt_count: 0,
            last_error: Some(decode_error.to_string()),
        };
        if let Ok(json) = serde_json::to_string(&record) {
            if let Err(e) = self
                .ctx
                .store
                .put_audit(&entry.job_id, &json, AUDIT_TTL_S)
                .await
            {
                warn!(error = %e, "Failed to audit malformed job (non-fatal)");
            }
        }

        EMAILS_TOTAL
            .with_label_values(&["malformed", entry.priority.as_str(), "unknown"])
            .inc();
    }
}
