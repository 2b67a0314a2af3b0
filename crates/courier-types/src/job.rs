// ============================================================================
// Email Job Model
// ============================================================================
//
// The persisted unit of work: an immutable send envelope plus the mutable
// processing state (attempt counter, last error) owned by the retry
// controller.
//
// ============================================================================

use crate::address::{validate_recipients, AddressError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Batch limit per job; larger sends must be split by the caller.
pub const MAX_RECIPIENTS_PER_JOB: usize = 100;

/// Queue priority. Determines which ready stream a job lives on and the
/// order in which workers poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Password resets, verification codes.
    High,
    /// Invites, confirmations.
    Medium,
    /// Newsletters, digests.
    Low,
}

impl Priority {
    /// Strict polling order: HIGH before MEDIUM before LOW.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(JobError::UnknownPriority(other.to_string())),
        }
    }
}

/// Outbound transport selector. Each kind maps to one driver and one
/// rate-limit bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Smtp,
    Sendgrid,
    Mailgun,
    AwsSes,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Smtp,
        ProviderKind::Sendgrid,
        ProviderKind::Mailgun,
        ProviderKind::AwsSes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Smtp => "smtp",
            ProviderKind::Sendgrid => "sendgrid",
            ProviderKind::Mailgun => "mailgun",
            ProviderKind::AwsSes => "aws_ses",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::Smtp
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smtp" => Ok(ProviderKind::Smtp),
            "sendgrid" => Ok(ProviderKind::Sendgrid),
            "mailgun" => Ok(ProviderKind::Mailgun),
            "aws_ses" => Ok(ProviderKind::AwsSes),
            other => Err(JobError::UnknownProvider(other.to_string())),
        }
    }
}

/// Lifecycle states recorded in the audit trail. A job in flight is only
/// ever in one of these from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Sent,
    FailedPermanent,
    Malformed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Sent => "sent",
            JobStatus::FailedPermanent => "failed_permanent",
            JobStatus::Malformed => "malformed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("recipients must not be empty")]
    NoRecipients,

    #[error("too many recipients in single job: {0} (max {MAX_RECIPIENTS_PER_JOB})")]
    TooManyRecipients(usize),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("template name must not be empty")]
    EmptyTemplate,

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// A single email send request as persisted on the queue.
///
/// `job_id`, the recipient list and the submission metadata are immutable
/// after creation. `attempt_count` and `last_error` are mutated only by the
/// retry controller; a redelivery after a worker crash does not touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJob {
    pub job_id: String,
    /// Non-empty, order preserved for the provider "to" header. Duplicates
    /// are allowed.
    pub recipients: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl EmailJob {
    /// Build a validated job with a fresh id and submission timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipients: Vec<String>,
        template: String,
        context: HashMap<String, Value>,
        subject: Option<String>,
        priority: Priority,
        provider: ProviderKind,
        scheduled_for: Option<DateTime<Utc>>,
        submitted_by: String,
    ) -> Result<Self, JobError> {
        if template.trim().is_empty() {
            return Err(JobError::EmptyTemplate);
        }
        validate_recipients(&recipients)?;
        if recipients.len() > MAX_RECIPIENTS_PER_JOB {
            return Err(JobError::TooManyRecipients(recipients.len()));
        }

        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            recipients,
            template,
            context,
            subject,
            priority,
            provider,
            scheduled_for,
            submitted_by,
            submitted_at: Utc::now(),
            attempt_count: 0,
            last_error: None,
        })
    }
}

/// Audit record kept for every job, keyed by `job_id`. Written at enqueue
/// and merged at the terminal transition. Retained for 30 days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: String,
    pub submitted_by: String,
    pub endpoint: String,
    pub submitted_at: DateTime<Utc>,
    pub template: String,
    pub recipient_count: usize,
    pub final_status: JobStatus,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Terminal storage entry for a job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_id: String,
    pub job: EmailJob,
    pub failure_reason: String,
    pub final_attempt_count: u32,
    /// Unix timestamp (seconds) of the DLQ transition.
    pub dead_lettered_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> EmailJob {
        EmailJob::new(
            vec!["a@example.com".into(), "b@example.com".into()],
            "welcome".into(),
            HashMap::from([("name".to_string(), Value::String("Ada".into()))]),
            Some("Hello".into()),
            Priority::High,
            ProviderKind::Sendgrid,
            None,
            "main-app".into(),
        )
        .unwrap()
    }

    #[test]
    fn new_job_starts_with_zero_attempts() {
        let job = job();
        assert_eq!(job.attempt_count, 0);
        assert!(job.last_error.is_none());
        assert!(!job.job_id.is_empty());
    }

    #[test]
    fn distinct_jobs_get_distinct_ids() {
        assert_ne!(job().job_id, job().job_id);
    }

    #[test]
    fn empty_recipients_rejected() {
        let err = EmailJob::new(
            vec![],
            "welcome".into(),
            HashMap::new(),
            None,
            Priority::default(),
            ProviderKind::default(),
            None,
            "svc".into(),
        )
        .unwrap_err();
        assert!(matches!(err, JobError::NoRecipients));
    }

    #[test]
    fn recipient_batch_limit_enforced() {
        let recipients: Vec<String> = (0..MAX_RECIPIENTS_PER_JOB + 1)
            .map(|i| format!("user{i}@example.com"))
            .collect();
        let err = EmailJob::new(
            recipients,
            "digest".into(),
            HashMap::new(),
            None,
            Priority::Low,
            ProviderKind::Smtp,
            None,
            "svc".into(),
        )
        .unwrap_err();
        assert!(matches!(err, JobError::TooManyRecipients(n) if n == MAX_RECIPIENTS_PER_JOB + 1));
    }

    #[test]
    fn empty_template_rejected() {
        let err = EmailJob::new(
            vec!["a@example.com".into()],
            "  ".into(),
            HashMap::new(),
            None,
            Priority::default(),
            ProviderKind::default(),
            None,
            "svc".into(),
        )
        .unwrap_err();
        assert!(matches!(err, JobError::EmptyTemplate));
    }

    #[test]
    fn job_roundtrips_through_messagepack() {
        let job = job();
        let bytes = rmp_serde::to_vec_named(&job).unwrap();
        let back: EmailJob = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn job_roundtrips_through_json() {
        let job = job();
        let text = serde_json::to_string(&job).unwrap();
        let back: EmailJob = serde_json::from_str(&text).unwrap();
        assert_eq!(job, back);
    }

    #[test]
    fn priority_parse_and_order() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(
            Priority::ALL,
            [Priority::High, Priority::Medium, Priority::Low]
        );
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn provider_parse() {
        assert_eq!("aws_ses".parse::<ProviderKind>().unwrap(), ProviderKind::AwsSes);
        assert!("postmark".parse::<ProviderKind>().is_err());
    }
}
