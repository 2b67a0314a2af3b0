// ============================================================================
// Service Authentication Configuration
// ============================================================================
//
// Service tokens are loaded from SERVICE_TOKEN_<NAME> environment variables.
// _PRIMARY / _SECONDARY / _BACKUP suffixes allow token rotation: both tokens
// stay valid while callers migrate.
//
//   SERVICE_AUTH_ENABLED=true
//   SERVICE_TOKEN_PREFIX=st_live_
//   SERVICE_TOKEN_MAIN_APP=st_live_abc...
//   SERVICE_TOKEN_USER_SERVICE_PRIMARY=st_live_def...
//
// ============================================================================

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token_prefix: String,
    /// Service name -> valid tokens (more than one during rotation).
    pub service_tokens: HashMap<String, Vec<String>>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let enabled = std::env::var("SERVICE_AUTH_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let token_prefix =
            std::env::var("SERVICE_TOKEN_PREFIX").unwrap_or_else(|_| "st_".to_string());

        let service_tokens = Self::load_tokens(&token_prefix, std::env::vars());

        if enabled && service_tokens.is_empty() {
            tracing::error!(
                "SERVICE_AUTH_ENABLED=true but no service tokens configured; \
                 add SERVICE_TOKEN_<NAME>=<token> to the environment"
            );
        } else if enabled {
            tracing::info!(
                services = service_tokens.len(),
                "Service authentication enabled"
            );
        } else {
            tracing::warn!("Service authentication DISABLED - all requests will be accepted");
        }

        Self {
            enabled,
            token_prefix,
            service_tokens,
        }
    }

    fn load_tokens(
        prefix: &str,
        vars: impl Iterator<Item = (String, String)>,
    ) -> HashMap<String, Vec<String>> {
        let mut tokens: HashMap<String, Vec<String>> = HashMap::new();

        for (key, value) in vars {
            let Some(raw_name) = key.strip_prefix("SERVICE_TOKEN_") else {
                continue;
            };
            if raw_name == "PREFIX" {
                continue;
            }

            // SERVICE_TOKEN_MAIN_APP -> main-app
            // SERVICE_TOKEN_USER_SERVICE_PRIMARY -> user-service
            let mut parts: Vec<&str> = raw_name.split('_').collect();
            if matches!(parts.last(), Some(&"PRIMARY" | &"SECONDARY" | &"BACKUP")) {
                parts.pop();
            }
            let service_name = parts.join("-").to_lowercase();

            if !value.starts_with(prefix) {
                tracing::warn!(
                    service = %service_name,
                    "Token does not start with required prefix '{}' - skipping",
                    prefix
                );
                continue;
            }

            tokens.entry(service_name).or_default().push(value);
        }

        tokens
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_prefix: "st_".to_string(),
            service_tokens: HashMap::new(),
        }
    }
}
