// ============================================================================
// SMTP Driver
// ============================================================================

use crate::providers::{EmailDriver, OutboundEmail, SendOutcome};
use anyhow::{Context, Result};
use async_trait::async_trait;
use courier_config::SmtpConfig;
use courier_types::ProviderKind;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

pub struct SmtpDriver {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDriver {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .context("Failed to build STARTTLS SMTP transport")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);

        // Local debug sinks (MailHog etc.) reject AUTH
        if let (Some(username), Some(password), false) = (
            config.username.clone(),
            config.password.clone(),
            config.is_local_sink(),
        ) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(email: &OutboundEmail) -> Result<Message, SendOutcome> {
        // A recipient the transport cannot even parse will never deliver
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| SendOutcome::Permanent(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(email.subject.clone());
        for recipient in &email.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| SendOutcome::Permanent(format!("invalid recipient {recipient}: {e}")))?;
            builder = builder.to(to);
        }

        let message = match (&email.html, &email.text) {
            (Some(html), Some(text)) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(html), None) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
            (None, text) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(text.clone().unwrap_or_default()),
            ),
        };

        message.map_err(|e| SendOutcome::Permanent(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl EmailDriver for SmtpDriver {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Smtp
    }

    async fn send(&self, email: &OutboundEmail) -> SendOutcome {
        let message = match Self::build_message(email) {
            Ok(message) => message,
            Err(outcome) => return outcome,
        };

        match self.transport.send(message).await {
            Ok(response) => {
                debug!(
                    recipients = email.recipients.len(),
                    code = %response.code(),
                    "SMTP dispatch accepted"
                );
                SendOutcome::Ok
            }
            Err(e) => {
                if e.is_permanent() {
                    SendOutcome::Permanent(format!("SMTP permanent rejection: {e}"))
                } else if e.is_transient() || e.is_timeout() {
                    SendOutcome::Transient(format!("SMTP transient failure: {e}"))
                } else if e.is_client() {
                    // Connection-level faults: worth retrying
                    SendOutcome::Transient(format!("SMTP connection failure: {e}"))
                } else {
                    SendOutcome::Unclassified(format!("SMTP error: {e}"))
                }
            }
        }
    }
}
