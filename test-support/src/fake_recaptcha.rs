use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/recaptcha/api/siteverify";

/// Stands in for the reCAPTCHA `siteverify` endpoint.
#[derive(Clone)]
pub struct FakeRecaptcha {
    required_secret: Cow<'static, str>,
    required_token: Option<String>,
    score: Option<f64>,
    action: String,
    return_invalid_response: bool,
    return_server_error: bool,
    requests: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    secret: String,
    response: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(rename = "error-codes")]
    error_codes: Vec<String>,
}

impl FakeRecaptcha {
    pub fn new(required_secret: impl Into<Cow<'static, str>>) -> Self {
        Self {
            required_secret: required_secret.into(),
            required_token: None,
            score: Some(0.9),
            action: "contact".into(),
            return_invalid_response: false,
            return_server_error: false,
            requests: Default::default(),
        }
    }

    /// Binds an ephemeral port, serves in the background and returns the verify URL.
    pub async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{VERIFY_PATH}")
    }

    pub fn require_token(self, required_token: impl AsRef<str>) -> Self {
        Self {
            required_token: Some(required_token.as_ref().into()),
            ..self
        }
    }

    pub fn with_score(self, score: f64) -> Self {
        Self {
            score: Some(score),
            ..self
        }
    }

    pub fn without_score(self) -> Self {
        Self {
            score: None,
            ..self
        }
    }

    pub fn with_action(self, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    /// Number of verification requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn verify(
    State(state): State<FakeRecaptcha>,
    Form(payload): Form<VerifyRequestPayload>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    if state.return_server_error {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if payload.secret != state.required_secret {
        Json(failure("invalid-input-secret")).into_response()
    } else if state
        .required_token
        .as_ref()
        .is_some_and(|token| *token != payload.response)
    {
        Json(failure("invalid-input-response")).into_response()
    } else {
        Json(VerifyResponsePayload {
            success: true,
            score: state.score,
            action: Some(state.action.clone()),
            error_codes: vec![],
        })
        .into_response()
    }
}

fn failure(code: &str) -> VerifyResponsePayload {
    VerifyResponsePayload {
        success: false,
        score: None,
        action: None,
        error_codes: vec![code.into()],
    }
}
