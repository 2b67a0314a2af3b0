// ============================================================================
// Persisted Key Layout
// ============================================================================
//
// Every Redis key the system touches is built here. The layout:
//
//   queue:ready:{priority}                    - the three priority streams
//   queue:parked                              - zset, score = due epoch ms
//   queue:parked:payload                      - hash job_id -> payload
//   queue:dlq                                 - hash job_id -> DeadLetterEntry
//   queue:dedup                               - enqueue suppression set
//   queue:scheduler:lock                      - promoter leader lock
//   stats:sent / stats:failed                 - lifetime counters
//   stats:sent:{yyyy-mm-dd}                   - daily counters, 48h TTL
//   rate:bucket:{provider}                    - token bucket hash
//   audit:job:{job_id}                        - AuditRecord JSON, 30d TTL
//   audit:service:{name}:calls:{yyyy-mm-dd}   - call timeline zset
//   audit:service:{name}:metrics              - per-service counters hash
//   worker:heartbeat:{worker_id}              - liveness key, 30s TTL
//
// ============================================================================

use chrono::{DateTime, Utc};
use courier_types::{Priority, ProviderKind};

/// Consumer group shared by all email workers.
pub const CONSUMER_GROUP: &str = "email-workers";

pub const READY_STREAM_PREFIX: &str = "queue:ready:";
pub const PARKED: &str = "queue:parked";
pub const PARKED_PAYLOAD: &str = "queue:parked:payload";
pub const DLQ: &str = "queue:dlq";
pub const DEDUP: &str = "queue:dedup";
pub const SCHEDULER_LOCK: &str = "queue:scheduler:lock";

pub const STATS_SENT: &str = "stats:sent";
pub const STATS_FAILED: &str = "stats:failed";

pub const HEARTBEAT_PREFIX: &str = "worker:heartbeat:";

pub fn ready_stream(priority: Priority) -> String {
    format!("{READY_STREAM_PREFIX}{priority}")
}

/// Member format inside the parked zset; the promotion script splits on the
/// first ':' to recover the target stream.
pub fn parked_member(priority: Priority, job_id: &str) -> String {
    format!("{priority}:{job_id}")
}

pub fn stats_daily(counter: &str, day: DateTime<Utc>) -> String {
    format!("{}:{}", counter, day.format("%Y-%m-%d"))
}

pub fn rate_bucket(provider: ProviderKind) -> String {
    format!("rate:bucket:{provider}")
}

pub fn audit_job(job_id: &str) -> String {
    format!("audit:job:{job_id}")
}

pub fn service_timeline(service: &str, day: DateTime<Utc>) -> String {
    format!("audit:service:{}:calls:{}", service, day.format("%Y-%m-%d"))
}

pub fn service_metrics(service: &str) -> String {
    format!("audit:service:{service}:metrics")
}

pub fn worker_heartbeat(worker_id: &str) -> String {
    format!("{HEARTBEAT_PREFIX}{worker_id}")
}

/// Recover the priority from a ready-stream key.
pub fn priority_of_stream(stream_key: &str) -> Option<Priority> {
    stream_key
        .strip_prefix(READY_STREAM_PREFIX)
        .and_then(|p| p.parse().ok())
}
