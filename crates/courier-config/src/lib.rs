// ============================================================================
// Courier Config - Centralized configuration management
// ============================================================================
//
// Provides centralized configuration for all Courier services. Supports
// loading from environment variables with sensible defaults.
//
// ============================================================================

mod auth;
mod constants;
mod providers;
mod worker;

pub use auth::AuthConfig;
pub use constants::*;
pub use providers::{
    MailgunConfig, ProviderConfig, RateBucket, SendgridConfig, SesConfig, SmtpConfig,
};
pub use worker::WorkerConfig;

use anyhow::Result;
use courier_types::ProviderKind;
use std::str::FromStr;

/// Main configuration structure for Courier services.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub bind_address: String,
    /// From-address stamped on every outbound message.
    pub from_email: String,
    pub template_dir: String,
    pub default_provider: ProviderKind,
    pub rust_log: String,

    pub worker: WorkerConfig,
    pub providers: ProviderConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let port = env_parse("PORT", DEFAULT_PORT);

        let default_provider = match std::env::var("DEFAULT_PROVIDER") {
            Ok(value) => ProviderKind::from_str(&value)
                .map_err(|e| anyhow::anyhow!("DEFAULT_PROVIDER: {e}"))?,
            Err(_) => ProviderKind::Smtp,
        };

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")?,
            port,
            bind_address: format!("[::]:{port}"),
            from_email: std::env::var("FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@courier.local".to_string()),
            template_dir: std::env::var("TEMPLATE_DIR")
                .unwrap_or_else(|_| "templates".to_string()),
            default_provider,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            worker: WorkerConfig::from_env(),
            providers: ProviderConfig::from_env(),
            auth: AuthConfig::from_env(),
        })
    }

    /// Defaults without touching the environment. Auth is disabled and the
    /// SMTP target is a local sink; used by the engine test-suite.
    pub fn test_defaults() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            port: DEFAULT_PORT,
            bind_address: format!("[::]:{DEFAULT_PORT}"),
            from_email: "noreply@courier.test".to_string(),
            template_dir: "templates".to_string(),
            default_provider: ProviderKind::Smtp,
            rust_log: "info".to_string(),
            worker: WorkerConfig::default(),
            providers: ProviderConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Stable worker-process identity: WORKER_ID env var, else hostname + pid.
/// Shared by every consumer in the process for heartbeats; individual
/// consumers suffix their index.
pub fn process_worker_id() -> String {
    if let Ok(id) = std::env::var("WORKER_ID") {
        return id;
    }
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Parse an environment variable, falling back to `default` when unset or
/// unparseable.
pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
