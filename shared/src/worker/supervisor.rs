// ============================================================================
// Worker Supervisor
// ============================================================================
//
// Starts the per-process task set (N workers, one reclaimer, one heartbeat),
// restarts crashed workers with exponential backoff, and drains everything
// cooperatively on shutdown. Workers observe the drain signal at their next
// poll and finish only the job already in flight; whatever is still running
// at DRAIN_TIMEOUT is aborted and its entries surface in the pending list
// for reclaim.
//
// ============================================================================

use crate::worker::consumer::{Worker, WorkerContext};
use crate::worker::Reclaimer;
use courier_config::{HEARTBEAT_REFRESH_S, HEARTBEAT_TTL_S};
use courier_metrics::WORKER_RESTARTS_TOTAL;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const RESTART_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(30);
/// A worker that survived this long gets a fresh backoff budget.
const STABLE_RUN: Duration = Duration::from_secs(60);

pub struct WorkerSupervisor {
    ctx: WorkerContext,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerSupervisor {
    /// Spawn the full task set and return the running supervisor.
    pub fn start(ctx: WorkerContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for index in 0..ctx.config.worker.worker_count {
            let handle = tokio::spawn(supervise_worker(index, ctx.clone(), shutdown_rx.clone()));
            handles.push((format!("worker-{index}"), handle));
        }

        let reclaimer = Reclaimer::new(ctx.clone(), shutdown_rx.clone());
        handles.push((
            "reclaimer".to_string(),
            tokio::spawn(async move {
                if let Err(e) = reclaimer.run().await {
                    error!(error = %e, "Reclaimer exited with error");
                }
            }),
        ));

        handles.push((
            "heartbeat".to_string(),
            tokio::spawn(heartbeat_loop(ctx.clone(), shutdown_rx)),
        ));

        info!(
            workers = ctx.config.worker.worker_count,
            worker_id = %ctx.worker_id,
            "Worker supervisor started"
        );

        Self {
            ctx,
            shutdown_tx,
            handles,
        }
    }

    /// Cooperative drain: signal, wait up to DRAIN_TIMEOUT for every task,
    /// abort the stragglers.
    pub async fn shutdown(self) {
        info!("Drain signal issued");
        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now()
            + Duration::from_secs(self.ctx.config.worker.drain_timeout_s);

        for (name, handle) in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = %name, error = %e, "Task ended abnormally during drain"),
                Err(_) => {
                    warn!(task = %name, "Drain timeout expired, aborting task");
                    // In-flight entries stay pending and will be reclaimed
                }
            }
        }

        info!("Worker supervisor stopped");
    }
}

/// Keep one worker slot alive: run, and on abnormal exit restart with
/// exponential backoff.
async fn supervise_worker(index: usize, ctx: WorkerContext, shutdown: watch::Receiver<bool>) {
    let mut backoff = RESTART_BACKOFF_MIN;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let started = Instant::now();
        let mut worker = Worker::new(format!("worker-{index}"), ctx.clone(), shutdown.clone());
        match worker.run().await {
            Ok(()) => return, // clean drain exit
            Err(e) => {
                if *shutdown.borrow() {
                    return;
                }
                if started.elapsed() >= STABLE_RUN {
                    backoff = RESTART_BACKOFF_MIN;
                }
                error!(
                    worker = index,
                    error = %e,
                    backoff_s = backoff.as_secs(),
                    "Worker crashed, restarting"
                );
                WORKER_RESTARTS_TOTAL
                    .with_label_values(&[&format!("worker-{index}")])
                    .inc();
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RESTART_BACKOFF_MAX);
            }
        }
    }
}

/// Refresh this process's liveness key until shutdown; the key's TTL lets
/// the health surface notice a dead process within 30 seconds.
async fn heartbeat_loop(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let refresh = Duration::from_secs(HEARTBEAT_REFRESH_S);

    loop {
        if *shutdown.borrow() {
            return;
        }

        if let Err(e) = ctx.store.heartbeat(&ctx.worker_id, HEARTBEAT_TTL_S).await {
            warn!(error = %e, "Heartbeat write failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(refresh) => {}
            _ = shutdown.changed() => {}
        }
    }
}
