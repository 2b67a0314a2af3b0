// ============================================================================
// Email Worker
// ============================================================================
//
// Standalone worker process. Runs WORKER_COUNT concurrent consumers against
// the shared consumer group, plus the per-process reclaimer and heartbeat.
// On SIGTERM/SIGINT the supervisor drains cooperatively: every consumer
// finishes its in-flight job and exits, bounded by DRAIN_TIMEOUT_S; anything
// aborted after that surfaces in the pending list and is reclaimed by
// another process.
//
// ============================================================================

use anyhow::{Context, Result};
use courier_config::{process_worker_id, Config};
use courier_server_shared::keys;
use courier_server_shared::providers::DriverSet;
use courier_server_shared::queue::RedisQueueStore;
use courier_server_shared::render::FileTemplates;
use courier_server_shared::worker::{WorkerContext, WorkerSupervisor};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let worker_id = process_worker_id();
    info!("=== Courier Email Worker Starting ===");
    info!("Worker id: {}", worker_id);
    info!("Worker count: {}", config.worker.worker_count);
    info!("Max attempts: {}", config.worker.max_attempts);

    let store = RedisQueueStore::connect(&config.redis_url, keys::CONSUMER_GROUP)
        .await
        .context("Failed to connect to the queue store")?;
    info!("Connected to Redis");

    let drivers = DriverSet::from_config(&config).context("Failed to build provider drivers")?;
    let renderer = FileTemplates::load(&config.template_dir);

    let ctx = WorkerContext {
        store: Arc::new(store),
        config: config.clone(),
        drivers: Arc::new(drivers),
        renderer: Arc::new(renderer),
        worker_id,
    };

    let supervisor = WorkerSupervisor::start(ctx);

    wait_for_shutdown_signal().await;
    supervisor.shutdown().await;

    info!("Email worker stopped gracefully");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM");
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful drain..."),
            _ = tokio::signal::ctrl_c() => info!("SIGINT received, initiating graceful drain..."),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, initiating graceful drain...");
    }
}
