// ============================================================================
// SendGrid Driver
// ============================================================================

use crate::providers::{
    classify_status, classify_transport_error, EmailDriver, OutboundEmail, SendOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::SendgridConfig;
use courier_types::ProviderKind;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct SendgridDriver {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl SendgridDriver {
    pub fn new(config: &SendgridConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build SendGrid HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn payload(email: &OutboundEmail) -> serde_json::Value {
        let to: Vec<_> = email
            .recipients
            .iter()
            .map(|address| json!({ "email": address }))
            .collect();

        let mut content = Vec::new();
        if let Some(text) = &email.text {
            content.push(json!({ "type": "text/plain", "value": text }));
        }
        if let Some(html) = &email.html {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        json!({
            "personalizations": [{ "to": to }],
            "from": { "email": email.from },
            "subject": email.subject,
            "content": content,
        })
    }
}

#[async_trait]
impl EmailDriver for SendgridDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sendgrid
    }

    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&Self::payload(email))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                debug!(status = %status, "SendGrid dispatch completed");
                classify_status(status, &body)
            }
            Err(e) => classify_transport_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_all_recipients_and_bodies() {
        let email = OutboundEmail {
            from: "noreply@courier.test".into(),
            recipients: vec!["a@example.com".into(), "b@example.com".into()],
            subject: "Hello".into(),
            html: Some("<p>hi</p>".into()),
            text: Some("hi".into()),
        };
        let payload = SendgridDriver::payload(&email);

        assert_eq!(payload["personalizations"][0]["to"][1]["email"], "b@example.com");
        assert_eq!(payload["subject"], "Hello");
        assert_eq!(payload["content"][0]["type"], "text/plain");
        assert_eq!(payload["content"][1]["type"], "text/html");
    }
}
