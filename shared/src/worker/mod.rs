//! The worker pool: N concurrent consumers per process reading the priority
//! streams, the retry/DLQ controller, the pending-entry reclaimer and the
//! supervisor that keeps all of it alive and drains it on shutdown.

mod consumer;
mod reclaim;
mod retry;
mod supervisor;

pub use consumer::{Worker, WorkerContext};
pub use reclaim::Reclaimer;
pub use retry::RetryController;
pub use supervisor::WorkerSupervisor;
