//! Shared time and default constants.

pub const SECONDS_PER_MINUTE: u64 = 60;
pub const SECONDS_PER_HOUR: u64 = 3600;
pub const SECONDS_PER_DAY: u64 = 86_400;

pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_WORKER_COUNT: usize = 3;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_RETRY_DELAY_S: u64 = 60;
pub const DEFAULT_PENDING_TIMEOUT_S: u64 = 60;
pub const DEFAULT_DRAIN_TIMEOUT_S: u64 = 30;
pub const DEFAULT_DISPATCH_TIMEOUT_S: u64 = 30;
pub const DEFAULT_RATE_WAIT_MAX_S: u64 = 30;
pub const DEFAULT_SCHEDULER_TICK_S: u64 = 1;
pub const DEFAULT_RECLAIM_INTERVAL_S: u64 = 30;

/// Job audit records are kept for 30 days.
pub const AUDIT_TTL_S: u64 = 30 * SECONDS_PER_DAY;
/// Per-service daily call timelines are kept for 90 days.
pub const TIMELINE_TTL_S: u64 = 90 * SECONDS_PER_DAY;
/// Daily sent/failed counters are kept for 48 hours.
pub const DAILY_COUNTER_TTL_S: u64 = 2 * SECONDS_PER_DAY;
/// Duplicate-enqueue suppression window.
pub const DEDUP_TTL_S: u64 = SECONDS_PER_HOUR;
/// Rate-limit bucket state expires when a provider goes idle.
pub const RATE_BUCKET_TTL_S: u64 = SECONDS_PER_HOUR;

pub const HEARTBEAT_TTL_S: u64 = 30;
pub const HEARTBEAT_REFRESH_S: u64 = 10;

/// Scheduler leader lock lifetime; refreshed every tick.
pub const SCHEDULER_LOCK_TTL_MS: u64 = 10_000;
/// Parked jobs promoted per scheduler tick.
pub const SCHEDULER_PROMOTE_BATCH: usize = 256;
