use crate::{
    error::ContactFormError,
    mailer::{MailTransport, Mailer},
    recaptcha::{RecaptchaVerifier, Verified},
    submission::{ContactFormMessage, Submission, ValidatedSubmission},
    webhook::WebhookForwarder,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::IpAddr;
use tracing::{debug, info};

pub const SUCCESS_MESSAGE: &str = "Message sent successfully. We'll be in touch soon.";

/// Runs a submission through validation, bot verification and dispatch.
pub struct ContactFormMessageHandler<T> {
    mailer: Mailer<T>,
    recaptcha_verifier: RecaptchaVerifier,
    webhook: Option<WebhookForwarder>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub name: String,
    pub email: String,
    pub timestamp: String,
}

#[derive(Serialize)]
struct SuccessBody {
    success: bool,
    message: &'static str,
    data: Receipt,
}

impl<T: MailTransport> ContactFormMessageHandler<T> {
    pub fn new(
        mailer: Mailer<T>,
        recaptcha_verifier: RecaptchaVerifier,
        webhook: Option<WebhookForwarder>,
    ) -> Self {
        Self {
            mailer,
            recaptcha_verifier,
            webhook,
        }
    }

    pub async fn handle(&self, message: ContactFormMessage, ip: IpAddr) -> Response {
        let submission = Submission::receive(message, ip);
        match self.process_message(&submission).await {
            Ok(receipt) => {
                info!("Relayed contact form submission from {ip}");
                (
                    StatusCode::OK,
                    Json(SuccessBody {
                        success: true,
                        message: SUCCESS_MESSAGE,
                        data: receipt,
                    }),
                )
                    .into_response()
            }
            Err(error) => {
                error.log();
                error.into_response()
            }
        }
    }

    pub async fn process_message(
        &self,
        submission: &Submission,
    ) -> Result<Receipt, ContactFormError> {
        let validated = submission
            .validate()
            .map_err(ContactFormError::ClientInput)?;
        self.verify_captcha(submission).await?;
        self.send_email(submission, &validated).await?;
        Ok(Receipt {
            name: validated.name.to_string(),
            email: validated.email.to_string(),
            timestamp: submission.iso_timestamp(),
        })
    }

    async fn verify_captcha(&self, submission: &Submission) -> Result<(), ContactFormError> {
        match self
            .recaptcha_verifier
            .verify_token(submission.captcha_token())
            .await?
        {
            Verified::Passed { score } => debug!("reCAPTCHA passed with score {score}"),
            Verified::NotConfigured | Verified::MissingToken => {}
        }
        Ok(())
    }

    /// Sends both emails and forwards to the webhook, if any, all at once.
    async fn send_email(
        &self,
        submission: &Submission,
        validated: &ValidatedSubmission<'_>,
    ) -> Result<(), ContactFormError> {
        let emails = async {
            self.mailer
                .dispatch(validated)
                .await
                .map_err(|error| ContactFormError::Dependency {
                    description: error.to_string(),
                })
        };
        let forward = async {
            match &self.webhook {
                Some(webhook) => {
                    webhook
                        .forward(submission)
                        .await
                        .map_err(|error| ContactFormError::Dependency {
                            description: error.to_string(),
                        })
                }
                None => Ok(()),
            }
        };
        tokio::try_join!(emails, forward)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::ContactFormMessageHandler;
    use crate::{
        config::RecaptchaSettings,
        mailer::{
            test_support::{mail_settings, RecordingTransport},
            Mailer,
        },
        recaptcha::RecaptchaVerifier,
    };
    use std::time::Duration;

    pub fn unconfigured_recaptcha() -> RecaptchaSettings {
        RecaptchaSettings {
            secret: None,
            verify_url: "http://127.0.0.1:9/siteverify".into(),
            min_score: 0.5,
            expected_action: None,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn handler(
        transport: RecordingTransport,
        recaptcha: RecaptchaSettings,
    ) -> ContactFormMessageHandler<RecordingTransport> {
        ContactFormMessageHandler::new(
            Mailer::new(transport, &mail_settings()),
            RecaptchaVerifier::new(recaptcha).unwrap(),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{
        test_support::{handler, unconfigured_recaptcha},
        ContactFormMessageHandler, Receipt,
    };
    use crate::{
        config::RecaptchaSettings,
        error::ContactFormError,
        mailer::{
            test_support::{mail_settings, RecordingTransport},
            Mailer,
        },
        recaptcha::RecaptchaVerifier,
        submission::{
            test_support::{submission, valid_form},
            ContactFormMessage, NAME_ERROR, SUSPICIOUS_ACTIVITY_ERROR,
        },
        webhook::WebhookForwarder,
    };
    use googletest::prelude::*;
    use secrecy::Secret;
    use std::time::Duration;
    use test_support::{fake_recaptcha::FakeRecaptcha, fake_webhook::FakeWebhook};

    const SECRET: &str = "arbitrary secret";

    fn recaptcha(verify_url: String) -> RecaptchaSettings {
        RecaptchaSettings {
            secret: Some(Secret::new(SECRET.into())),
            verify_url,
            ..unconfigured_recaptcha()
        }
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_both_emails_for_valid_submission() {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone(), unconfigured_recaptcha());
        let submission = submission(valid_form());

        let result = subject.process_message(&submission).await;

        expect_that!(
            result,
            ok(eq(Receipt {
                name: "Arbitrary sender".into(),
                email: "email@example.com".into(),
                timestamp: submission.iso_timestamp(),
            }))
        );
        expect_that!(transport.sent(), len(eq(2)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_nothing_for_short_name() {
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone(), unconfigured_recaptcha());
        let submission = submission(ContactFormMessage {
            name: Some("A".into()),
            ..valid_form()
        });

        let result = subject.process_message(&submission).await;

        expect_that!(
            result,
            err(matches_pattern!(ContactFormError::ClientInput(contains(eq(
                NAME_ERROR
            )))))
        );
        expect_that!(transport.sent(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn rejects_honeypot_before_verification() {
        let fake = FakeRecaptcha::new(SECRET);
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone(), recaptcha(fake.start().await));
        let submission = submission(ContactFormMessage {
            hp: Some("bot".into()),
            captcha_token: Some("token".into()),
            ..valid_form()
        });

        let result = subject.process_message(&submission).await;

        expect_that!(
            result,
            err(matches_pattern!(ContactFormError::ClientInput(contains(eq(
                SUSPICIOUS_ACTIVITY_ERROR
            )))))
        );
        expect_that!(fake.request_count(), eq(0));
        expect_that!(transport.sent(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_nothing_when_score_is_low() {
        let fake = FakeRecaptcha::new(SECRET).with_score(0.2);
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone(), recaptcha(fake.start().await));
        let submission = submission(ContactFormMessage {
            captcha_token: Some("token".into()),
            ..valid_form()
        });

        let result = subject.process_message(&submission).await;

        expect_that!(
            result.map_err(|e| matches!(e, ContactFormError::BotCheck(_))),
            err(eq(true))
        );
        expect_that!(transport.sent(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_when_secret_configured_but_token_missing() {
        let fake = FakeRecaptcha::new(SECRET);
        let transport = RecordingTransport::default();
        let subject = handler(transport.clone(), recaptcha(fake.start().await));

        let result = subject.process_message(&submission(valid_form())).await;

        expect_that!(result, ok(anything()));
        expect_that!(fake.request_count(), eq(0));
        expect_that!(transport.sent(), len(eq(2)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn reports_dependency_failure_when_transport_fails() {
        let subject = handler(
            RecordingTransport::failing("connection refused"),
            unconfigured_recaptcha(),
        );

        let result = subject.process_message(&submission(valid_form())).await;

        expect_that!(
            result,
            err(matches_pattern!(ContactFormError::Dependency {
                description: contains_substring("connection refused"),
            }))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn forwards_to_webhook_alongside_emails() {
        let fake = FakeWebhook::new();
        let transport = RecordingTransport::default();
        let subject = ContactFormMessageHandler::new(
            Mailer::new(transport.clone(), &mail_settings()),
            RecaptchaVerifier::new(unconfigured_recaptcha()).unwrap(),
            Some(WebhookForwarder::new(fake.start().await, Duration::from_secs(1)).unwrap()),
        );

        let result = subject.process_message(&submission(valid_form())).await;

        expect_that!(result, ok(anything()));
        expect_that!(fake.received(), len(eq(1)));
        expect_that!(transport.sent(), len(eq(2)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn fails_when_webhook_fails() {
        let fake = FakeWebhook::new().return_server_error();
        let subject = ContactFormMessageHandler::new(
            Mailer::new(RecordingTransport::default(), &mail_settings()),
            RecaptchaVerifier::new(unconfigured_recaptcha()).unwrap(),
            Some(WebhookForwarder::new(fake.start().await, Duration::from_secs(1)).unwrap()),
        );

        let result = subject.process_message(&submission(valid_form())).await;

        expect_that!(
            result.map_err(|e| matches!(e, ContactFormError::Dependency { .. })),
            err(eq(true))
        );
    }
}
