//! Worker pool, retry and scheduler tuning.

use crate::constants::*;
use crate::env_parse;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent consumers per worker process.
    pub worker_count: usize,
    /// Failed attempts before a job is dead-lettered.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt, ±20% jitter.
    pub base_retry_delay_s: u64,
    /// Idle time after which a pending entry may be reclaimed.
    pub pending_timeout_s: u64,
    /// Grace period for in-flight jobs on shutdown.
    pub drain_timeout_s: u64,
    /// Hard deadline per provider dispatch.
    pub dispatch_timeout_s: u64,
    /// Maximum time spent waiting on a rate bucket before the job is
    /// treated as transiently failed.
    pub rate_wait_max_s: u64,
    pub scheduler_tick_s: u64,
    pub reclaim_interval_s: u64,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            worker_count: env_parse("WORKER_COUNT", DEFAULT_WORKER_COUNT),
            max_attempts: env_parse("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            base_retry_delay_s: env_parse("BASE_RETRY_DELAY_S", DEFAULT_BASE_RETRY_DELAY_S),
            pending_timeout_s: env_parse("PENDING_TIMEOUT_S", DEFAULT_PENDING_TIMEOUT_S),
            drain_timeout_s: env_parse("DRAIN_TIMEOUT_S", DEFAULT_DRAIN_TIMEOUT_S),
            dispatch_timeout_s: env_parse("DISPATCH_TIMEOUT_S", DEFAULT_DISPATCH_TIMEOUT_S),
            rate_wait_max_s: env_parse("RATE_WAIT_MAX_S", DEFAULT_RATE_WAIT_MAX_S),
            scheduler_tick_s: env_parse("SCHEDULER_TICK_S", DEFAULT_SCHEDULER_TICK_S),
            reclaim_interval_s: env_parse("RECLAIM_INTERVAL_S", DEFAULT_RECLAIM_INTERVAL_S),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay_s: DEFAULT_BASE_RETRY_DELAY_S,
            pending_timeout_s: DEFAULT_PENDING_TIMEOUT_S,
            drain_timeout_s: DEFAULT_DRAIN_TIMEOUT_S,
            dispatch_timeout_s: DEFAULT_DISPATCH_TIMEOUT_S,
            rate_wait_max_s: DEFAULT_RATE_WAIT_MAX_S,
            scheduler_tick_s: DEFAULT_SCHEDULER_TICK_S,
            reclaim_interval_s: DEFAULT_RECLAIM_INTERVAL_S,
        }
    }
}
