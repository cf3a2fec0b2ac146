use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const WEBHOOK_PATH: &str = "/webhook/contact-form";

/// Stands in for a workflow webhook, keeping every JSON body it receives.
#[derive(Clone, Default)]
pub struct FakeWebhook {
    received: Arc<Mutex<Vec<Value>>>,
    return_server_error: bool,
}

impl FakeWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    /// Binds an ephemeral port, serves in the background and returns the webhook URL.
    pub async fn start(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let app = Router::new()
            .route(WEBHOOK_PATH, post(receive))
            .with_state(self.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{address}{WEBHOOK_PATH}")
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }
}

async fn receive(State(state): State<FakeWebhook>, Json(body): Json<Value>) -> StatusCode {
    state.received.lock().unwrap().push(body);
    if state.return_server_error {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}
