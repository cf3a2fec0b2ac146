use chrono::{DateTime, SecondsFormat, Utc};
use lettre::Address;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::{net::IpAddr, sync::LazyLock};

pub const NAME_ERROR: &str = "Name must be at least 2 characters long";
pub const EMAIL_ERROR: &str = "Valid email address is required";
pub const MESSAGE_ERROR: &str = "Message must be at least 10 characters long";
pub const SUSPICIOUS_ACTIVITY_ERROR: &str = "Suspicious activity detected";

const MIN_NAME_LENGTH: usize = 2;
const MIN_MESSAGE_LENGTH: usize = 10;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern should be a valid regex")
});

/// The body of a contact form post, as sent by the multi-step form on the website.
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContactFormMessage {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub business: Option<String>,
    pub industry: Option<String>,
    pub current_website: Option<String>,
    #[serde(default, deserialize_with = "deserialize_project_types")]
    pub project_types: Vec<String>,
    pub budget: Option<String>,
    pub timeline: Option<String>,
    pub care_plan: Option<String>,
    pub message: Option<String>,
    pub goals: Option<String>,
    pub target_audience: Option<String>,
    pub design_inspiration: Option<String>,
    pub special_requirements: Option<String>,
    pub source: Option<String>,
    /// Honeypot, hidden from real visitors.
    #[serde(skip_serializing)]
    pub hp: Option<String>,
    /// Second honeypot. The visible business name travels as `business`.
    #[serde(skip_serializing)]
    pub company: Option<String>,
    #[serde(
        rename = "captcha_token",
        alias = "g-recaptcha-response",
        skip_serializing
    )]
    pub captcha_token: Option<String>,
}

/// Accepts either `"seo, redesign"` or `["seo", "redesign"]`.
fn deserialize_project_types<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let values = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(joined)) => joined.split(',').map(String::from).collect(),
        Some(OneOrMany::Many(values)) => values,
    };
    Ok(values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

/// One contact form submission for the lifetime of a single request.
#[derive(Debug, Clone)]
pub struct Submission {
    pub form: ContactFormMessage,
    pub ip: IpAddr,
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    pub fn receive(form: ContactFormMessage, ip: IpAddr) -> Self {
        Self {
            form,
            ip,
            timestamp: Utc::now(),
        }
    }

    pub fn iso_timestamp(&self) -> String {
        iso_timestamp(self.timestamp)
    }

    /// Returns every rule the submission breaks, in a fixed order. Empty means valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if trimmed_length(&self.form.name) < MIN_NAME_LENGTH {
            errors.push(NAME_ERROR.to_string());
        }

        if !self
            .form
            .email
            .as_deref()
            .is_some_and(|email| EMAIL_PATTERN.is_match(email))
        {
            errors.push(EMAIL_ERROR.to_string());
        }

        if trimmed_length(&self.form.message) < MIN_MESSAGE_LENGTH {
            errors.push(MESSAGE_ERROR.to_string());
        }

        if is_filled(&self.form.hp) || is_filled(&self.form.company) {
            errors.push(SUSPICIOUS_ACTIVITY_ERROR.to_string());
        }

        errors
    }

    pub fn validate(&self) -> Result<ValidatedSubmission<'_>, Vec<String>> {
        let mut errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(errors);
        }

        // The pattern lets through a few shapes that are not deliverable mailboxes.
        let Some(Ok(email)) = self.form.email.as_deref().map(str::parse::<Address>) else {
            errors.push(EMAIL_ERROR.to_string());
            return Err(errors);
        };

        Ok(ValidatedSubmission {
            submission: self,
            name: self.form.name.as_deref().unwrap_or_default().trim(),
            email,
            message: self.form.message.as_deref().unwrap_or_default().trim(),
        })
    }

    pub fn captcha_token(&self) -> Option<&str> {
        self.form.captcha_token.as_deref()
    }
}

/// A submission which passed validation, with its required fields extracted.
#[derive(Debug)]
pub struct ValidatedSubmission<'a> {
    pub submission: &'a Submission,
    pub name: &'a str,
    pub email: Address,
    pub message: &'a str,
}

impl ValidatedSubmission<'_> {
    /// An optional field if the submitter filled it in, trimmed.
    pub fn provided<'b>(&self, field: &'b Option<String>) -> Option<&'b str> {
        field
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn form(&self) -> &ContactFormMessage {
        &self.submission.form
    }
}

pub fn iso_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn trimmed_length(field: &Option<String>) -> usize {
    field
        .as_deref()
        .map_or(0, |value| value.trim().chars().count())
}

fn is_filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.is_empty())
}

#[cfg(test)]
pub mod test_support {
    use super::{ContactFormMessage, Submission};
    use std::net::{IpAddr, Ipv4Addr};

    pub fn valid_form() -> ContactFormMessage {
        ContactFormMessage {
            name: Some("Arbitrary sender".into()),
            email: Some("email@example.com".into()),
            message: Some("I would like a new website.".into()),
            ..Default::default()
        }
    }

    pub fn submission(form: ContactFormMessage) -> Submission {
        Submission::receive(form, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
    }
}
