// ============================================================================
// AWS SES Driver
// ============================================================================
//
// Talks the SESv2 outbound-emails JSON shape. Request signing is delegated
// to the endpoint in AWS_SES_API_URL (an SES-compatible local endpoint or a
// signing gateway); the driver itself only attaches the bearer token.
//
// ============================================================================

use crate::providers::{
    classify_status, classify_transport_error, EmailDriver, OutboundEmail, SendOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::SesConfig;
use courier_types::ProviderKind;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct SesDriver {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl SesDriver {
    pub fn new(config: &SesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build SES HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v2/email/outbound-emails",
                config.api_url.trim_end_matches('/')
            ),
            access_token: config.access_token.clone(),
        })
    }

    fn payload(email: &OutboundEmail) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(html) = &email.html {
            body.insert("Html".to_string(), json!({ "Data": html }));
        }
        if let Some(text) = &email.text {
            body.insert("Text".to_string(), json!({ "Data": text }));
        }

        json!({
            "FromEmailAddress": email.from,
            "Destination": { "ToAddresses": email.recipients },
            "Content": {
                "Simple": {
                    "Subject": { "Data": email.subject },
                    "Body": body,
                }
            }
        })
    }
}

#[async_trait]
impl EmailDriver for SesDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AwsSes
    }

    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        if self.endpoint.starts_with("/v2") {
            // AWS_SES_API_URL was never configured
            return SendOutcome::Permanent("aws_ses endpoint not configured".to_string());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&Self::payload(email))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                debug!(status = %status, "SES dispatch completed");
                classify_status(status, &body)
            }
            Err(e) => classify_transport_error(&e),
        }
    }
}
