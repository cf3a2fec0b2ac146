use crate::submission::{ContactFormMessage, Submission};
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Posts accepted submissions to a workflow automation webhook.
pub struct WebhookForwarder {
    client: Client,
    url: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Error forwarding submission to webhook: {0}")]
pub struct WebhookError(#[from] reqwest::Error);

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    form: &'a ContactFormMessage,
    ip: String,
    timestamp: String,
}

impl WebhookForwarder {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn forward(&self, submission: &Submission) -> Result<(), WebhookError> {
        let source = submission
            .form
            .source
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .unwrap_or("website");
        let payload = WebhookPayload {
            form: &ContactFormMessage {
                source: Some(source.into()),
                ..submission.form.clone()
            },
            ip: submission.ip.to_string(),
            timestamp: submission.iso_timestamp(),
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(Response::error_for_status)?;
        info!("Forwarded submission to webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::WebhookForwarder;
    use crate::submission::{
        test_support::{submission, valid_form},
        ContactFormMessage,
    };
    use googletest::prelude::*;
    use std::time::Duration;
    use test_support::fake_webhook::FakeWebhook;

    #[googletest::test]
    #[tokio::test]
    async fn posts_form_with_server_fields() {
        let fake = FakeWebhook::new();
        let subject = WebhookForwarder::new(fake.start().await, Duration::from_secs(1)).unwrap();
        let submission = submission(ContactFormMessage {
            budget: Some("3k-7k".into()),
            hp: Some("".into()),
            ..valid_form()
        });

        let result = subject.forward(&submission).await;

        expect_that!(result, ok(anything()));
        let received = fake.received();
        expect_that!(received, len(eq(1)));
        let body = &received[0];
        expect_that!(body["email"], eq("email@example.com"));
        expect_that!(body["budget"], eq("3k-7k"));
        expect_that!(body["source"], eq("website"));
        expect_that!(body["ip"], eq("192.0.2.1"));
        expect_that!(
            body["timestamp"],
            eq(submission.iso_timestamp())
        );
        expect_that!(body.get("hp"), none());
    }

    #[googletest::test]
    #[tokio::test]
    async fn keeps_submitted_source() {
        let fake = FakeWebhook::new();
        let subject = WebhookForwarder::new(fake.start().await, Duration::from_secs(1)).unwrap();
        let submission = submission(ContactFormMessage {
            source: Some("landing-page".into()),
            ..valid_form()
        });

        subject.forward(&submission).await.unwrap();

        expect_that!(
            fake.received()[0]["source"],
            eq("landing-page")
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn fails_when_webhook_returns_error() {
        let fake = FakeWebhook::new().return_server_error();
        let subject = WebhookForwarder::new(fake.start().await, Duration::from_secs(1)).unwrap();

        let result = subject.forward(&submission(valid_form())).await;

        expect_that!(result, err(anything()));
    }
}
