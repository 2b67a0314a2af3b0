// ============================================================================
// API Service
// ============================================================================
//
// HTTP ingress for the Courier email system. Validates and authenticates
// callers, enqueues jobs onto the priority streams and serves the stats,
// health and metrics surfaces. Delivery itself happens in the email-worker
// processes.
//
// ============================================================================

use anyhow::{Context, Result};
use courier_config::Config;
use courier_server_shared::auth::ServiceAuthenticator;
use courier_server_shared::keys;
use courier_server_shared::queue::RedisQueueStore;
use courier_server_shared::routes::{build_router, AppState};
use courier_server_shared::service::EmailService;
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

    info!("=== Courier API Service Starting ===");
    info!("Bind address: {}", config.bind_address);
    info!("Default provider: {}", config.default_provider);

    let store = RedisQueueStore::connect(&config.redis_url, keys::CONSUMER_GROUP)
        .await
        .context("Failed to connect to the queue store")?;
    let store = Arc::new(store);
    info!("Connected to Redis");

    let state = AppState {
        service: Arc::new(EmailService::new(store, config.clone())),
        auth: Arc::new(ServiceAuthenticator::new(config.auth.clone())),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    info!("API service listening on {}", config.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("API service stopped");
    Ok(())
}

async fn shutdown_signal() {
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
