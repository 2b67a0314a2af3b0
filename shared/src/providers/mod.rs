// ============================================================================
// Provider Drivers
// ============================================================================
//
// One driver per ProviderKind behind a common trait. Drivers classify their
// own failures where the transport allows it; `Unclassified` defers to the
// engine's conservative rule (retriable on the first attempt, permanent
// afterward). Every driver sits behind a circuit breaker so a melting
// provider fails fast instead of eating the dispatch timeout per job.
//
// ============================================================================

mod circuit_breaker;
mod mailgun;
mod sendgrid;
mod ses;
mod smtp;

pub use circuit_breaker::CircuitBreaker;
pub use mailgun::MailgunDriver;
pub use sendgrid::SendgridDriver;
pub use ses::SesDriver;
pub use smtp::SmtpDriver;

use async_trait::async_trait;
use courier_config::Config;
use courier_types::ProviderKind;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    /// Worth retrying: network faults, 5xx, 408/429, timeouts.
    Transient(String),
    /// Never retry: auth failures, rejected addresses, other 4xx.
    Permanent(String),
    /// The driver could not classify; the engine decides by attempt count.
    Unclassified(String),
}

/// A rendered message ready for a transport.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[async_trait]
pub trait EmailDriver: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Dispatch one message. Infallible at the signature level: transport
    /// errors come back classified inside the outcome. The caller enforces
    /// the dispatch deadline.
    async fn send(&self, email: &OutboundEmail) -> SendOutcome;
}

/// Map an HTTP status from an API provider onto an outcome.
///
/// 2xx success; 408/429 and 5xx transient; remaining 4xx permanent.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Ok;
    }
    let reason = format!("{}: {}", status.as_u16(), truncate(body, 200));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SendOutcome::Transient(reason)
    } else if status.is_client_error() {
        SendOutcome::Permanent(reason)
    } else {
        SendOutcome::Unclassified(reason)
    }
}

/// Map a reqwest transport error onto an outcome.
pub(crate) fn classify_transport_error(err: &reqwest::Error) -> SendOutcome {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        SendOutcome::Transient(err.to_string())
    } else {
        SendOutcome::Unclassified(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// The drivers for all providers, each behind its own circuit breaker.
pub struct DriverSet {
    drivers: HashMap<ProviderKind, Arc<dyn EmailDriver>>,
    breakers: HashMap<ProviderKind, Mutex<CircuitBreaker>>,
}

impl DriverSet {
    /// Build the production set from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut drivers: HashMap<ProviderKind, Arc<dyn EmailDriver>> = HashMap::new();
        drivers.insert(
            ProviderKind::Smtp,
            Arc::new(SmtpDriver::new(&config.providers.smtp)?),
        );
        drivers.insert(
            ProviderKind::Sendgrid,
            Arc::new(SendgridDriver::new(&config.providers.sendgrid)?),
        );
        drivers.insert(
            ProviderKind::Mailgun,
            Arc::new(MailgunDriver::new(&config.providers.mailgun)?),
        );
        drivers.insert(
            ProviderKind::AwsSes,
            Arc::new(SesDriver::new(&config.providers.ses)?),
        );
        Ok(Self::new(drivers))
    }

    /// Build from explicit drivers; used by tests to plug in stubs.
    pub fn new(drivers: HashMap<ProviderKind, Arc<dyn EmailDriver>>) -> Self {
        let breakers = drivers
            .keys()
            .map(|&kind| (kind, Mutex::new(CircuitBreaker::default())))
            .collect();
        Self { drivers, breakers }
    }

    /// Dispatch through the provider's driver, guarded by its breaker.
    pub async fn dispatch(&self, kind: ProviderKind, email: &OutboundEmail) -> SendOutcome {
        let Some(driver) = self.drivers.get(&kind) else {
            return SendOutcome::Permanent(format!("no driver configured for {kind}"));
        };

        {
            let mut breaker = self.breakers[&kind].lock().expect("breaker poisoned");
            if !breaker.can_execute() {
                warn!(provider = %kind, "Circuit breaker open, short-circuiting dispatch");
                return SendOutcome::Transient(format!("circuit breaker open for {kind}"));
            }
        }

        let outcome = driver.send(email).await;

        let mut breaker = self.breakers[&kind].lock().expect("breaker poisoned");
        match &outcome {
            SendOutcome::Ok | SendOutcome::Permanent(_) => breaker.record_success(),
            SendOutcome::Transient(_) | SendOutcome::Unclassified(_) => breaker.record_failure(),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_table() {
        assert_eq!(classify_status(StatusCode::ACCEPTED, ""), SendOutcome::Ok);
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            SendOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, ""),
            SendOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            SendOutcome::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            SendOutcome::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad address"),
            SendOutcome::Permanent(_)
        ));
    }

    struct FlakyDriver;

    #[async_trait]
    impl EmailDriver for FlakyDriver {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Smtp
        }
        async fn send(&self, _email: &OutboundEmail) -> SendOutcome {
            SendOutcome::Transient("boom".into())
        }
    }

    fn email() -> OutboundEmail {
        OutboundEmail {
            from: "noreply@courier.test".into(),
            recipients: vec!["a@example.com".into()],
            subject: "s".into(),
            html: None,
            text: Some("t".into()),
        }
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_transients() {
        let mut drivers: HashMap<ProviderKind, Arc<dyn EmailDriver>> = HashMap::new();
        drivers.insert(ProviderKind::Smtp, Arc::new(FlakyDriver));
        let set = DriverSet::new(drivers);

        for _ in 0..5 {
            assert!(matches!(
                set.dispatch(ProviderKind::Smtp, &email()).await,
                SendOutcome::Transient(_)
            ));
        }
        // Breaker now open: reason changes to the short-circuit
        match set.dispatch(ProviderKind::Smtp, &email()).await {
            SendOutcome::Transient(reason) => assert!(reason.contains("circuit breaker")),
            other => panic!("expected transient, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_permanent() {
        let set = DriverSet::new(HashMap::new());
        assert!(matches!(
            set.dispatch(ProviderKind::Mailgun, &email()).await,
            SendOutcome::Permanent(_)
        ));
    }
}
