//! Redis access layer for Courier: a thin client over the multiplexed
//! connection manager, stream verbs, and the Lua scripts behind every
//! multi-step atomic operation.

mod client;
mod scripts;
mod streams;

pub use client::RedisClient;
pub use scripts::{
    enqueue_parked_script, enqueue_ready_script, promote_due_script, refresh_lock_script,
    token_bucket_script,
};
pub use streams::{PendingSummary, StreamEntry};

pub type Result<T> = std::result::Result<T, redis::RedisError>;
