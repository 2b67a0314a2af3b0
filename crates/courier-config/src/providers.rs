// ============================================================================
// Provider Configuration
// ============================================================================
//
// Transport settings and rate-limit bucket sizes per provider. Buckets are
// tunable via RATE_<PROVIDER>_CAPACITY / RATE_<PROVIDER>_REFILL_PER_SEC.
//
// ============================================================================

use crate::env_parse;
use courier_types::ProviderKind;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// STARTTLS; disabled for local debug sinks such as MailHog.
    pub use_tls: bool,
}

impl SmtpConfig {
    fn from_env() -> Self {
        Self {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: env_parse("SMTP_PORT", 1025),
            username: std::env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
            password: std::env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Local debug sinks accept mail without authentication.
    pub fn is_local_sink(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "mailhog")
    }
}

#[derive(Debug, Clone)]
pub struct SendgridConfig {
    pub api_key: String,
    pub api_url: String,
}

impl SendgridConfig {
    fn from_env() -> Self {
        Self {
            api_key: std::env::var("SENDGRID_API_KEY").unwrap_or_default(),
            api_url: std::env::var("SENDGRID_API_URL")
                .unwrap_or_else(|_| "https://api.sendgrid.com/v3/mail/send".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailgunConfig {
    pub api_key: String,
    pub domain: String,
    pub api_url: String,
}

impl MailgunConfig {
    fn from_env() -> Self {
        Self {
            api_key: std::env::var("MAILGUN_API_KEY").unwrap_or_default(),
            domain: std::env::var("MAILGUN_DOMAIN").unwrap_or_default(),
            api_url: std::env::var("MAILGUN_API_URL")
                .unwrap_or_else(|_| "https://api.mailgun.net/v3".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SesConfig {
    /// SESv2 HTTP endpoint (or a local gateway that signs requests).
    pub api_url: String,
    pub access_token: String,
}

impl SesConfig {
    fn from_env() -> Self {
        Self {
            api_url: std::env::var("AWS_SES_API_URL").unwrap_or_default(),
            access_token: std::env::var("AWS_SES_ACCESS_TOKEN").unwrap_or_default(),
        }
    }
}

/// Token-bucket parameters for one provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBucket {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub smtp: SmtpConfig,
    pub sendgrid: SendgridConfig,
    pub mailgun: MailgunConfig,
    pub ses: SesConfig,
    smtp_bucket: RateBucket,
    sendgrid_bucket: RateBucket,
    mailgun_bucket: RateBucket,
    ses_bucket: RateBucket,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            smtp: SmtpConfig::from_env(),
            sendgrid: SendgridConfig::from_env(),
            mailgun: MailgunConfig::from_env(),
            ses: SesConfig::from_env(),
            smtp_bucket: bucket_from_env("SMTP", 100.0, 10.0),
            sendgrid_bucket: bucket_from_env("SENDGRID", 600.0, 100.0),
            mailgun_bucket: bucket_from_env("MAILGUN", 300.0, 50.0),
            ses_bucket: bucket_from_env("AWS_SES", 200.0, 14.0),
        }
    }

    pub fn bucket(&self, kind: ProviderKind) -> RateBucket {
        match kind {
            ProviderKind::Smtp => self.smtp_bucket,
            ProviderKind::Sendgrid => self.sendgrid_bucket,
            ProviderKind::Mailgun => self.mailgun_bucket,
            ProviderKind::AwsSes => self.ses_bucket,
        }
    }

    /// Override one bucket; used by tests to force contention.
    pub fn set_bucket(&mut self, kind: ProviderKind, bucket: RateBucket) {
        match kind {
            ProviderKind::Smtp => self.smtp_bucket = bucket,
            ProviderKind::Sendgrid => self.sendgrid_bucket = bucket,
            ProviderKind::Mailgun => self.mailgun_bucket = bucket,
            ProviderKind::AwsSes => self.ses_bucket = bucket,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 1025,
                username: None,
                password: None,
                use_tls: false,
            },
            sendgrid: SendgridConfig {
                api_key: String::new(),
                api_url: "https://api.sendgrid.com/v3/mail/send".to_string(),
            },
            mailgun: MailgunConfig {
                api_key: String::new(),
                domain: String::new(),
                api_url: "https://api.mailgun.net/v3".to_string(),
            },
            ses: SesConfig {
                api_url: String::new(),
                access_token: String::new(),
            },
            smtp_bucket: RateBucket { capacity: 100.0, refill_per_sec: 10.0 },
            sendgrid_bucket: RateBucket { capacity: 600.0, refill_per_sec: 100.0 },
            mailgun_bucket: RateBucket { capacity: 300.0, refill_per_sec: 50.0 },
            ses_bucket: RateBucket { capacity: 200.0, refill_per_sec: 14.0 },
        }
    }
}

fn bucket_from_env(prefix: &str, capacity: f64, refill_per_sec: f64) -> RateBucket {
    RateBucket {
        capacity: env_parse(&format!("RATE_{prefix}_CAPACITY"), capacity),
        refill_per_sec: env_parse(&format!("RATE_{prefix}_REFILL_PER_SEC"), refill_per_sec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_buckets_match_documented_limits() {
        let config = ProviderConfig::default();
        assert_eq!(config.bucket(ProviderKind::Smtp).capacity, 100.0);
        assert_eq!(config.bucket(ProviderKind::Sendgrid).refill_per_sec, 100.0);
        assert_eq!(config.bucket(ProviderKind::Mailgun).capacity, 300.0);
        assert_eq!(config.bucket(ProviderKind::AwsSes).refill_per_sec, 14.0);
    }

    #[test]
    fn bucket_override() {
        let mut config = ProviderConfig::default();
        config.set_bucket(
            ProviderKind::Smtp,
            RateBucket { capacity: 2.0, refill_per_sec: 0.0 },
        );
        assert_eq!(config.bucket(ProviderKind::Smtp).capacity, 2.0);
    }
}
