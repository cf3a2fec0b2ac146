use crate::templates::TemplateStrategy;
use axum::http::HeaderValue;
use lettre::{message::Mailbox, Address};
use secrecy::Secret;
use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr},
    str::FromStr,
    time::Duration,
};

pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM_ADDRESS: &str = "noreply@ramxdigital.com";
const DEFAULT_NOTIFICATION_ADDRESS: &str = "cisco@ramxdigital.com";
const DEFAULT_BOOKING_URL: &str = "https://calendly.com/cisco-ramxdigital/30min";
const DEFAULT_CORS_ALLOWED_ORIGINS: [&str; 4] = [
    "https://ramxdigital.com",
    "https://www.ramxdigital.com",
    "http://localhost:3000",
    "http://localhost:3001",
];
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Everything the relay needs, read once at startup.
#[derive(Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub recaptcha: RecaptchaSettings,
    pub smtp: SmtpSettings,
    pub mail: MailSettings,
    pub rate_limit: RateLimitSettings,
    /// Workflow webhook which receives a copy of every accepted submission.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApplicationSettings {
    pub host: IpAddr,
    pub port: u16,
    /// Take the caller address from `X-Forwarded-For` rather than the peer address.
    pub trust_proxy: bool,
    pub cors_allowed_origins: Vec<String>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RecaptchaSettings {
    /// Without a secret every submission passes verification.
    pub secret: Option<Secret<String>>,
    pub verify_url: String,
    pub min_score: f64,
    pub expected_action: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain text connection. Credentials are never sent.
    None,
    StartTls,
    /// Implicit TLS, usually on port 465.
    Tls,
}

impl FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(SmtpSecurity::None),
            "starttls" => Ok(SmtpSecurity::StartTls),
            "tls" | "ssl" | "smtps" => Ok(SmtpSecurity::Tls),
            other => Err(format!("expected one of none, starttls, tls but got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    pub from_address: Address,
    pub notification_mailbox: Mailbox,
    pub templates: TemplateStrategy,
    pub timeout: Duration,
    pub booking_url: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Settings {
    /// Reads the settings from the process environment.
    ///
    /// Call `dotenvy::dotenv` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the settings from an arbitrary key/value source. Unset or blank keys take their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let source = Source(lookup);

        let application = ApplicationSettings {
            host: source.parse_or("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: source.parse_or("PORT", DEFAULT_PORT)?,
            trust_proxy: source.parse_or("TRUST_PROXY", false)?,
            cors_allowed_origins: match source.get("CORS_ALLOWED_ORIGINS") {
                Some(origins) => cors_origins(&origins)?,
                None => DEFAULT_CORS_ALLOWED_ORIGINS
                    .iter()
                    .map(|origin| origin.to_string())
                    .collect(),
            },
            max_body_bytes: source.parse_or("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        };

        let min_score: f64 = source.parse_or("RECAPTCHA_MIN_SCORE", 0.5)?;
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ConfigError::Invalid {
                key: "RECAPTCHA_MIN_SCORE",
                value: min_score.to_string(),
                reason: "score must lie between 0.0 and 1.0".into(),
            });
        }
        let recaptcha = RecaptchaSettings {
            secret: source.get("RECAPTCHA_SECRET_KEY").map(Secret::new),
            verify_url: source
                .get("RECAPTCHA_VERIFY_URL")
                .unwrap_or_else(|| RECAPTCHA_VERIFY_URL.into()),
            min_score,
            expected_action: source.get("RECAPTCHA_EXPECTED_ACTION"),
            timeout: Duration::from_secs(source.parse_or("RECAPTCHA_TIMEOUT_SECS", 5)?),
        };

        let smtp_port = source.parse_or("SMTP_PORT", DEFAULT_SMTP_PORT)?;
        let smtp = SmtpSettings {
            host: source.get("SMTP_HOST").unwrap_or_else(|| "localhost".into()),
            port: smtp_port,
            security: source.parse_or(
                "SMTP_SECURITY",
                if smtp_port == 465 {
                    SmtpSecurity::Tls
                } else {
                    SmtpSecurity::StartTls
                },
            )?,
            username: source.get("SMTP_USER"),
            password: source.get("SMTP_PASS").map(Secret::new),
        };

        let from_address = match source.parse::<Address>("MAIL_FROM")? {
            Some(address) => address,
            None => match smtp
                .username
                .as_deref()
                .and_then(|username| username.parse().ok())
            {
                Some(address) => address,
                None => default_address("MAIL_FROM", DEFAULT_FROM_ADDRESS)?,
            },
        };
        let mail = MailSettings {
            from_address,
            notification_mailbox: source.parse_or(
                "NOTIFICATION_EMAIL",
                Mailbox::new(
                    None,
                    default_address("NOTIFICATION_EMAIL", DEFAULT_NOTIFICATION_ADDRESS)?,
                ),
            )?,
            templates: source.parse_or("MAIL_TEMPLATES", TemplateStrategy::default())?,
            timeout: Duration::from_secs(source.parse_or("MAIL_TIMEOUT_SECS", 10)?),
            booking_url: source
                .get("BOOKING_URL")
                .unwrap_or_else(|| DEFAULT_BOOKING_URL.into()),
        };

        let rate_limit = RateLimitSettings {
            max_requests: source.parse_or("RATE_LIMIT_MAX", 5)?,
            window: Duration::from_secs(source.parse_or("RATE_LIMIT_WINDOW_SECS", 15 * 60)?),
        };

        Ok(Self {
            application,
            recaptcha,
            smtp,
            mail,
            rate_limit,
            webhook_url: source.get("WEBHOOK_URL"),
        })
    }
}

/// Splits a comma-separated origin list. Credentials are allowed on cross-origin requests, so
/// every entry must be a concrete origin usable as a header value.
fn cors_origins(origins: &str) -> Result<Vec<String>, ConfigError> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            let invalid = |reason: &str| ConfigError::Invalid {
                key: "CORS_ALLOWED_ORIGINS",
                value: origin.into(),
                reason: reason.into(),
            };
            if origin == "*" {
                return Err(invalid("wildcard origin cannot be combined with credentials"));
            }
            HeaderValue::from_str(origin)
                .map_err(|_| invalid("origin is not a valid header value"))?;
            Ok(origin.to_string())
        })
        .collect()
}

fn default_address(key: &'static str, address: &str) -> Result<Address, ConfigError> {
    address
        .parse()
        .map_err(|error: lettre::address::AddressError| ConfigError::Invalid {
            key,
            value: address.into(),
            reason: error.to_string(),
        })
}

struct Source<F>(F);

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.parse().map_err(|error: T::Err| ConfigError::Invalid {
                    key,
                    reason: error.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}
