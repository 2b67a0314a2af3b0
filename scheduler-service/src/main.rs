// ============================================================================
// Scheduler Service
// ============================================================================
//
// Promotes future-dated jobs from the parked set onto their ready streams
// once their time arrives. Exactly one replica does the work (leader lock);
// run a single instance and treat the lock as a safety net against an
// accidental second one.
//
// ============================================================================

use anyhow::{Context, Result};
use courier_config::Config;
use courier_server_shared::keys;
use courier_server_shared::queue::RedisQueueStore;
use courier_server_shared::scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::watch;
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

    info!("=== Courier Scheduler Starting ===");
    info!("Tick interval: {}s", config.worker.scheduler_tick_s);

    let store = RedisQueueStore::connect(&config.redis_url, keys::CONSUMER_GROUP)
        .await
        .context("Failed to connect to the queue store")?;
    info!("Connected to Redis");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(Arc::new(store), config);

    let run = tokio::spawn(scheduler.run(shutdown_rx));

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    run.await
        .context("Scheduler task panicked")?
        .context("Scheduler failed")?;

    info!("Scheduler stopped gracefully");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM");
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down..."),
            _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down...");
    }
}
