//! Shared domain types for the Courier email dispatch system.

mod address;
mod job;

pub use address::{validate_recipient, validate_recipients, AddressError};
pub use job::{
    AuditRecord, DeadLetterEntry, EmailJob, JobError, JobStatus, Priority, ProviderKind,
    MAX_RECIPIENTS_PER_JOB,
};
