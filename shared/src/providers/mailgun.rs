// ============================================================================
// Mailgun Driver
// ============================================================================

use crate::providers::{
    classify_status, classify_transport_error, EmailDriver, OutboundEmail, SendOutcome,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::MailgunConfig;
use courier_types::ProviderKind;
use std::time::Duration;
use tracing::debug;

pub struct MailgunDriver {
    client: reqwest::Client,
    messages_url: String,
    api_key: String,
}

impl MailgunDriver {
    pub fn new(config: &MailgunConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to build Mailgun HTTP client")?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.api_url.trim_end_matches('/'),
                config.domain
            ),
            api_key: config.api_key.clone(),
        })
    }

    fn form(email: &OutboundEmail) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("from", email.from.clone()),
            ("to", email.recipients.join(",")),
            ("subject", email.subject.clone()),
        ];
        if let Some(text) = &email.text {
            form.push(("text", text.clone()));
        }
        if let Some(html) = &email.html {
            form.push(("html", html.clone()));
        }
        form
    }
}

#[async_trait]
impl EmailDriver for MailgunDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mailgun
    }

    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        let response = self
            .client
            .post(&self.messages_url)
            .basic_auth("api", Some(&self.api_key))
            .form(&Self::form(email))
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                debug!(status = %status, "Mailgun dispatch completed");
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
    fn form_joins_recipients_for_the_to_header() {
        let email = OutboundEmail {
            from: "noreply@courier.test".into(),
            recipients: vec!["a@example.com".into(), "b@example.com".into()],
            subject: "s".into(),
            html: None,
            text: Some("body".into()),
        };
        let form = MailgunDriver::form(&email);
        assert!(form.contains(&("to", "a@example.com,b@example.com".to_string())));
        assert!(form.iter().any(|(k, _)| *k == "text"));
        assert!(!form.iter().any(|(k, _)| *k == "html"));
    }

    #[test]
    fn messages_url_includes_domain() {
        let driver = MailgunDriver::new(&MailgunConfig {
            api_key: "key".into(),
            domain: "mg.example.com".into(),
            api_url: "https://api.mailgun.net/v3/".into(),
        })
        .unwrap();
        assert_eq!(
            driver.messages_url,
            "https://api.mailgun.net/v3/mg.example.com/messages"
        );
    }
}
