use crate::recaptcha::RecaptchaError;
use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::{net::IpAddr, time::Duration};
use tracing::{error, warn};

pub const MALFORMED_BODY_ERROR: &str = "Malformed request body";

/// Every way a submission can end without both emails going out.
#[derive(Debug, thiserror::Error)]
pub enum ContactFormError {
    #[error("Client error: {0:?}")]
    ClientInput(Vec<String>),
    #[error("Bot check failed: {0}")]
    BotCheck(#[from] RecaptchaError),
    #[error("Rate limit exceeded for {ip}")]
    RateLimited { ip: IpAddr, retry_after: Duration },
    /// A downstream service failed. The description stays in the server log.
    #[error("Internal error: {description}")]
    Dependency { description: String },
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

impl ContactFormError {
    pub fn malformed_body() -> Self {
        ContactFormError::ClientInput(vec![MALFORMED_BODY_ERROR.into()])
    }

    pub fn log(&self) {
        match self {
            ContactFormError::ClientInput(errors) => {
                warn!("Rejected contact form submission: {}", errors.join("; "));
            }
            ContactFormError::BotCheck(error) if error.is_service_failure() => {
                error!("Unable to verify reCAPTCHA token, rejecting submission: {error}");
            }
            ContactFormError::BotCheck(error) => {
                warn!("reCAPTCHA rejected submission: {error}");
            }
            ContactFormError::RateLimited { ip, retry_after } => {
                warn!(
                    "Rate limit exceeded for {ip}, next window opens in {}s",
                    retry_after.as_secs()
                );
            }
            ContactFormError::Dependency { description } => {
                error!("Internal error sending contact form email: {description}");
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ContactFormError::ClientInput(_) | ContactFormError::BotCheck(_) => {
                StatusCode::BAD_REQUEST
            }
            ContactFormError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ContactFormError::Dependency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ContactFormError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ContactFormError::ClientInput(errors) => (
                status,
                Json(ErrorBody {
                    success: false,
                    message: "Validation failed",
                    errors: Some(errors),
                    error: None,
                }),
            )
                .into_response(),
            ContactFormError::BotCheck(_) => (
                status,
                Json(ErrorBody {
                    success: false,
                    message: "reCAPTCHA verification failed",
                    errors: None,
                    error: Some("RECAPTCHA_FAILED"),
                }),
            )
                .into_response(),
            ContactFormError::RateLimited { retry_after, .. } => (
                status,
                // Whole seconds, rounded up so a client never retries before the window opens.
                [(
                    RETRY_AFTER,
                    retry_after
                        .as_secs()
                        .saturating_add(u64::from(retry_after.subsec_nanos() > 0))
                        .to_string(),
                )],
                Json(ErrorBody {
                    success: false,
                    message: "Too many requests, please try again later.",
                    errors: None,
                    error: None,
                }),
            )
                .into_response(),
            ContactFormError::Dependency { .. } => (
                status,
                Json(ErrorBody {
                    success: false,
                    message: "Internal server error. Please try again later.",
                    errors: None,
                    error: Some("SERVER_ERROR"),
                }),
            )
                .into_response(),
        }
    }
}
