// ============================================================================
// Pending-Entry Reclaimer
// ============================================================================
//
// One elected task per worker process. Entries delivered to a consumer that
// died before acking stay in the group's pending list; once their idle time
// passes PENDING_TIMEOUT the reclaimer claims them for this process and runs
// them through the normal processing path. A reclaim is a redelivery, not a
// retry: the job's attempt_count is untouched.
//
// ============================================================================

use crate::keys;
use crate::worker::consumer::{Worker, WorkerContext};
use anyhow::Result;
use courier_metrics::RECLAIMED_TOTAL;
use courier_types::Priority;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Reclaimer {
    processor: Worker,
    ctx: WorkerContext,
    shutdown: watch::Receiver<bool>,
}

impl Reclaimer {
    pub fn new(ctx: WorkerContext, shutdown: watch::Receiver<bool>) -> Self {
        // The reclaimer reuses the worker state machine for claimed entries
        let processor = Worker::new("reclaimer", ctx.clone(), shutdown.clone());
        Self {
            processor,
            ctx,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let interval = Duration::from_secs(self.ctx.config.worker.reclaim_interval_s.max(1));
        info!(interval_s = interval.as_secs(), "Reclaimer started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep().await {
                error!(error = %e, "Reclaim sweep failed");
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Reclaimer stopped");
        Ok(())
    }

    /// One sweep over all priorities: claim everything idle beyond the
    /// pending timeout and reprocess it here.
    pub async fn sweep(&mut self) -> Result<()> {
        let pending_timeout_ms = self.ctx.config.worker.pending_timeout_s * 1000;

        for priority in Priority::ALL {
            let pending = self
                .ctx
                .store
                .pending(priority, keys::CONSUMER_GROUP)
                .await?;

            let stale: Vec<String> = pending
                .iter()
                .filter(|entry| {
                    entry.idle_ms > pending_timeout_ms && entry.consumer != self.ctx.worker_id
                })
                .map(|entry| entry.entry_id.clone())
                .collect();

            if stale.is_empty() {
                continue;
            }

            let claimed = self
                .ctx
                .store
                .claim(
                    priority,
                    keys::CONSUMER_GROUP,
                    &self.ctx.worker_id,
                    pending_timeout_ms,
                    &stale,
                )
                .await?;

            if claimed.is_empty() {
                continue;
            }

            RECLAIMED_TOTAL
                .with_label_values(&[priority.as_str()])
                .inc_by(claimed.len() as u64);
            warn!(
                priority = %priority,
                count = claimed.len(),
                "Reclaimed stale pending entries"
            );

            for entry in claimed {
                self.processor.process(entry).await;
            }
        }

        Ok(())
    }
}
