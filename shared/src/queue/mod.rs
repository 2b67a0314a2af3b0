//! The queue store seam: one trait, a Redis production implementation and an
//! in-memory fake with the same consumer-group semantics for the engine
//! test-suite.

mod memory;
mod redis_store;
mod store;

pub use memory::MemoryQueueStore;
pub use redis_store::RedisQueueStore;
pub use store::{BucketState, EnqueueOutcome, PendingEntry, QueueEntry, QueueStore};
