// ============================================================================
// Scheduler
// ============================================================================
//
// Singleton promoter for parked jobs. Exactly one live scheduler holds the
// leader lock; it polls the parked set every tick and atomically moves every
// job whose due time has passed onto its ready stream. Without a leader,
// parked jobs are not promoted, so the deployment must keep one scheduler
// replica alive (the lock only makes an accidental second replica harmless).
//
// ============================================================================

use crate::audit::now_ms;
use crate::keys;
use crate::queue::QueueStore;
use anyhow::Result;
use courier_config::{Config, SCHEDULER_LOCK_TTL_MS, SCHEDULER_PROMOTE_BATCH};
use courier_metrics::PROMOTED_TOTAL;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    config: Arc<Config>,
    owner: String,
    leader: bool,
}

impl Scheduler {
    pub fn new(store: Arc<dyn QueueStore>, config: Arc<Config>) -> Self {
        Self {
            store,
            config,
            owner: Uuid::new_v4().to_string(),
            leader: false,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let tick = Duration::from_secs(self.config.worker.scheduler_tick_s.max(1));
        info!(tick_s = tick.as_secs(), "Scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// One election + promotion round.
    pub async fn tick(&mut self) -> Result<()> {
        if !self.ensure_leadership().await? {
            return Ok(());
        }

        let promoted = self
            .store
            .promote_due(now_ms(), SCHEDULER_PROMOTE_BATCH)
            .await?;

        if !promoted.is_empty() {
            PROMOTED_TOTAL
                .with_label_values(&["due"])
                .inc_by(promoted.len() as u64);
            info!(count = promoted.len(), "Promoted due jobs to ready streams");
            for job_id in &promoted {
                debug!(job_id = %job_id, "Scheduled job promoted");
            }
        }

        Ok(())
    }

    async fn ensure_leadership(&mut self) -> Result<bool> {
        if self.leader {
            if self
                .store
                .refresh_lock(keys::SCHEDULER_LOCK, &self.owner, SCHEDULER_LOCK_TTL_MS)
                .await?
            {
                return Ok(true);
            }
            warn!("Scheduler lost the leader lock");
            self.leader = false;
        }

        if self
            .store
            .acquire_lock(keys::SCHEDULER_LOCK, &self.owner, SCHEDULER_LOCK_TTL_MS)
            .await?
        {
            info!("Scheduler acquired the leader lock");
            self.leader = true;
        }
        Ok(self.leader)
    }
}
