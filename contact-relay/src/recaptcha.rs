use crate::config::RecaptchaSettings;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::{debug, warn};

/// Checks reCAPTCHA v3 tokens against the verification service.
///
/// The gate distinguishes three situations:
///  * no secret configured, or no token supplied: the submission passes unverified;
///  * the service answers: the submission passes only with `success` and a high enough score;
///  * the service cannot be reached or answers garbage: the submission is rejected.
pub struct RecaptchaVerifier {
    client: Client,
    settings: RecaptchaSettings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verified {
    Passed { score: f64 },
    NotConfigured,
    MissingToken,
}

impl RecaptchaVerifier {
    pub fn new(settings: RecaptchaSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn is_configured(&self) -> bool {
        self.settings.secret.is_some()
    }

    pub async fn verify_token(&self, token: Option<&str>) -> Result<Verified, RecaptchaError> {
        let Some(secret) = self.settings.secret.as_ref() else {
            debug!("No reCAPTCHA secret configured, letting request pass without verification.");
            return Ok(Verified::NotConfigured);
        };
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            warn!("Submission carries no reCAPTCHA token, letting request pass without verification.");
            return Ok(Verified::MissingToken);
        };
        let response = self.send_token(secret, token).await?;
        let body: RecaptchaResponse = response
            .json()
            .await
            .map_err(RecaptchaError::Unavailable)?;
        self.process_response(body)
    }

    async fn send_token(
        &self,
        secret: &Secret<String>,
        token: &str,
    ) -> Result<Response, RecaptchaError> {
        self.client
            .post(&self.settings.verify_url)
            .form(&[("secret", secret.expose_secret().as_str()), ("response", token)])
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(RecaptchaError::Unavailable)
    }

    fn process_response(&self, response: RecaptchaResponse) -> Result<Verified, RecaptchaError> {
        if !response.success {
            return Err(RecaptchaError::Unsuccessful(response.error_codes));
        }
        let Some(score) = response.score else {
            return Err(RecaptchaError::MissingScore);
        };
        if score < self.settings.min_score {
            return Err(RecaptchaError::LowScore {
                score,
                min_score: self.settings.min_score,
            });
        }
        if let Some(expected) = self.settings.expected_action.as_deref() {
            if response.action.as_deref() != Some(expected) {
                return Err(RecaptchaError::ActionMismatch {
                    expected: expected.into(),
                    actual: response.action,
                });
            }
        }
        Ok(Verified::Passed { score })
    }
}

#[derive(Deserialize, Debug)]
struct RecaptchaResponse {
    success: bool,
    score: Option<f64>,
    action: Option<String>,
    #[serde(rename = "error-codes", default)]
    error_codes: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecaptchaError {
    #[error("Verification service unavailable: {0}")]
    Unavailable(reqwest::Error),
    #[error("Verification unsuccessful: {0:?}")]
    Unsuccessful(Vec<String>),
    #[error("Verification response carries no score")]
    MissingScore,
    #[error("Score {score} below threshold {min_score}")]
    LowScore { score: f64, min_score: f64 },
    #[error("Expected action {expected} but got {actual:?}")]
    ActionMismatch {
        expected: String,
        actual: Option<String>,
    },
}

impl RecaptchaError {
    /// Whether the failure lies with the verification service rather than with the token.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, RecaptchaError::Unavailable(_))
    }
}
