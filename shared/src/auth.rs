// ============================================================================
// Service-to-Service Authentication
// ============================================================================
//
// Callers authenticate with an `X-Service-Token` header. Tokens are
// configured per service via SERVICE_TOKEN_<NAME> environment variables and
// compared in constant time; the resolved identity is attached to the
// request and stamped onto every job the call produces.
//
// ============================================================================

use axum::http::Request;
use chrono::{DateTime, Utc};
use courier_config::AuthConfig;
use courier_error::AppError;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub authenticated_at: DateTime<Utc>,
}

impl ServiceIdentity {
    /// Identity used when authentication is disabled (dev / tests).
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            authenticated_at: Utc::now(),
        }
    }
}

pub struct ServiceAuthenticator {
    config: AuthConfig,
}

impl ServiceAuthenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Verify a presented token and resolve the calling service.
    ///
    /// Every configured token is compared in constant time; the loop never
    /// exits early on a match so the timing does not leak which service (if
    /// any) the token belonged to.
    pub fn verify(&self, token: &str) -> Result<ServiceIdentity, AppError> {
        if !self.config.enabled {
            return Ok(ServiceIdentity::anonymous());
        }

        if !token.starts_with(&self.config.token_prefix) {
            warn!("Service token with invalid prefix rejected");
            return Err(AppError::auth("invalid token format"));
        }

        let mut matched: Option<&str> = None;
        for (service, tokens) in &self.config.service_tokens {
            for candidate in tokens {
                if candidate.len() == token.len()
                    && candidate.as_bytes().ct_eq(token.as_bytes()).into()
                {
                    matched = Some(service);
                }
            }
        }

        match matched {
            Some(service) => {
                debug!(service = %service, "Service authenticated");
                Ok(ServiceIdentity {
                    name: service.to_string(),
                    authenticated_at: Utc::now(),
                })
            }
            None => {
                warn!("Unknown service token rejected");
                Err(AppError::auth("unknown service token"))
            }
        }
    }

    /// Extract and verify the token header from a request.
    pub fn authenticate<B>(&self, request: &Request<B>) -> Result<ServiceIdentity, AppError> {
        if !self.config.enabled {
            return Ok(ServiceIdentity::anonymous());
        }

        let token = request
            .headers()
            .get(SERVICE_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::auth("missing X-Service-Token header"))?;

        self.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn authenticator(enabled: bool) -> ServiceAuthenticator {
        let mut service_tokens = HashMap::new();
        service_tokens.insert(
            "main-app".to_string(),
            vec!["st_live_abc123".to_string(), "st_live_rotated".to_string()],
        );
        service_tokens.insert("batch".to_string(), vec!["st_live_batch".to_string()]);
        ServiceAuthenticator::new(AuthConfig {
            enabled,
            token_prefix: "st_".to_string(),
            service_tokens,
        })
    }

    #[test]
    fn resolves_service_by_token() {
        let auth = authenticator(true);
        assert_eq!(auth.verify("st_live_abc123").unwrap().name, "main-app");
        assert_eq!(auth.verify("st_live_rotated").unwrap().name, "main-app");
        assert_eq!(auth.verify("st_live_batch").unwrap().name, "batch");
    }

    #[test]
    fn rejects_unknown_and_malformed_tokens() {
        let auth = authenticator(true);
        assert!(auth.verify("st_live_nope").is_err());
        assert!(auth.verify("plain").is_err());
        assert!(auth.verify("").is_err());
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = authenticator(false);
        assert_eq!(auth.verify("whatever").unwrap().name, "anonymous");
    }

    #[test]
    fn header_extraction() {
        let auth = authenticator(true);
        let request = Request::builder()
            .header(SERVICE_TOKEN_HEADER, "st_live_abc123")
            .body(())
            .unwrap();
        assert_eq!(auth.authenticate(&request).unwrap().name, "main-app");

        let missing = Request::builder().body(()).unwrap();
        assert!(auth.authenticate(&missing).is_err());
    }
}
