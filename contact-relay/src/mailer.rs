use crate::{
    config::{MailSettings, SmtpSecurity, SmtpSettings},
    submission::ValidatedSubmission,
    templates::{Branding, RenderedEmail, TemplateError, TemplateStrategy},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Seam between the dispatcher and the wire, so tests can record messages instead of sending.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn send(&self, message: Message) -> Result<(), MailTransportError>;
}

#[async_trait]
impl MailTransport for AsyncSmtpTransport<Tokio1Executor> {
    async fn send(&self, message: Message) -> Result<(), MailTransportError> {
        let response = AsyncTransport::send(self, message).await?;
        debug!("SMTP server answered {:?}", response.code());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailTransportError {
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Builds the SMTP transport described by the settings.
pub fn smtp_transport(
    settings: &SmtpSettings,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error> {
    let mut builder = match settings.security {
        SmtpSecurity::None => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host.as_str())
        }
        SmtpSecurity::StartTls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        }
        SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
    }
    .port(settings.port);

    // Credentials only travel over an encrypted connection. A server which insists on them over
    // plain text will refuse the message, which is preferable to leaking the password.
    if let (Some(username), Some(password), SmtpSecurity::StartTls | SmtpSecurity::Tls) =
        (&settings.username, &settings.password, settings.security)
    {
        builder = builder
            .credentials(Credentials::new(
                username.clone(),
                password.expose_secret().clone(),
            ))
            .authentication(vec![Mechanism::Plain, Mechanism::Login]);
    }

    Ok(builder.build())
}

/// Renders and sends the pair of emails for one submission.
pub struct Mailer<T> {
    transport: T,
    from: Address,
    operator: Mailbox,
    templates: TemplateStrategy,
    branding: Branding,
    timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Render(#[from] TemplateError),
    #[error("Error building {kind}: {source}")]
    Build {
        kind: &'static str,
        source: lettre::error::Error,
    },
    #[error("Error sending {kind}: {source}")]
    Send {
        kind: &'static str,
        source: MailTransportError,
    },
    #[error("Mail dispatch did not finish within {0:?}")]
    TimedOut(Duration),
}

/// The two messages produced for a submission.
pub struct ComposedEmails {
    pub notification: Message,
    pub acknowledgement: Message,
}

const NOTIFICATION: &str = "lead notification";
const ACKNOWLEDGEMENT: &str = "acknowledgement";

impl<T: MailTransport> Mailer<T> {
    pub fn new(transport: T, settings: &MailSettings) -> Self {
        Self {
            transport,
            from: settings.from_address.clone(),
            operator: settings.notification_mailbox.clone(),
            templates: settings.templates,
            branding: Branding::ramx_digital(
                settings.notification_mailbox.email.to_string(),
                settings.booking_url.clone(),
            ),
            timeout: settings.timeout,
        }
    }

    pub fn compose(&self, submission: &ValidatedSubmission) -> Result<ComposedEmails, DispatchError> {
        let rendered = self.templates.render(submission, &self.branding)?;
        let submitter = Mailbox::new(Some(submission.name.to_string()), submission.email.clone());

        let notification = self
            .message(rendered.notification, self.operator.clone(), submitter.clone())
            .map_err(|source| DispatchError::Build {
                kind: NOTIFICATION,
                source,
            })?;
        let acknowledgement = self
            .message(rendered.acknowledgement, submitter, self.operator.clone())
            .map_err(|source| DispatchError::Build {
                kind: ACKNOWLEDGEMENT,
                source,
            })?;

        Ok(ComposedEmails {
            notification,
            acknowledgement,
        })
    }

    /// Sends the notification and the acknowledgement concurrently.
    ///
    /// Succeeds only once both messages are accepted by the transport. Running past the
    /// configured timeout counts as a failure, even if one of the sends later completes.
    pub async fn dispatch(&self, submission: &ValidatedSubmission<'_>) -> Result<(), DispatchError> {
        let ComposedEmails {
            notification,
            acknowledgement,
        } = self.compose(submission)?;

        let sends = async {
            tokio::try_join!(
                self.send(NOTIFICATION, notification),
                self.send(ACKNOWLEDGEMENT, acknowledgement),
            )
        };
        timeout(self.timeout, sends)
            .await
            .map_err(|_| DispatchError::TimedOut(self.timeout))??;

        info!("Sent lead notification and acknowledgement for {}", submission.email);
        Ok(())
    }

    async fn send(&self, kind: &'static str, message: Message) -> Result<(), DispatchError> {
        self.transport
            .send(message)
            .await
            .map_err(|source| DispatchError::Send { kind, source })
    }

    fn message(
        &self,
        rendered: RenderedEmail,
        to: Mailbox,
        reply_to: Mailbox,
    ) -> Result<Message, lettre::error::Error> {
        Message::builder()
            .from(Mailbox::new(Some(rendered.sender_name), self.from.clone()))
            .reply_to(reply_to)
            .to(to)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
    }
}


#[cfg(test)]
mod tests {
    use super::{
        test_support::{mail_settings, RecordingTransport},
        DispatchError, Mailer,
    };
    use crate::{
        config::MailSettings,
        submission::test_support::{submission, valid_form},
    };
    use googletest::prelude::*;
    use std::time::Duration;

    fn header(raw: &str, name: &str) -> Option<String> {
        let prefix = format!("{name}: ");
        raw.lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .map(String::from)
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_notification_to_operator_and_acknowledgement_to_submitter() {
        let transport = RecordingTransport::default();
        let subject = Mailer::new(transport.clone(), &mail_settings());
        let submission = submission(valid_form());

        let result = subject.dispatch(&submission.validate().unwrap()).await;

        expect_that!(result, ok(anything()));
        let recipients: Vec<String> = transport
            .sent()
            .iter()
            .flat_map(|message| message.envelope().to().to_vec())
            .map(|address| address.to_string())
            .collect();
        expect_that!(
            recipients,
            unordered_elements_are![eq("cisco@ramxdigital.com"), eq("email@example.com")]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn notification_replies_to_submitter() {
        let transport = RecordingTransport::default();
        let subject = Mailer::new(transport.clone(), &mail_settings());
        let submission = submission(valid_form());

        let composed = subject.compose(&submission.validate().unwrap()).unwrap();
        let raw = String::from_utf8_lossy(&composed.notification.formatted()).into_owned();

        expect_that!(
            header(&raw, "Reply-To"),
            some(contains_substring("email@example.com"))
        );
        expect_that!(
            header(&raw, "To"),
            some(contains_substring("cisco@ramxdigital.com"))
        );
        expect_that!(
            header(&raw, "Subject"),
            some(eq("New enquiry from Arbitrary sender"))
        );
        expect_that!(
            header(&raw, "Content-Type"),
            some(starts_with("text/plain"))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn acknowledgement_replies_to_operator() {
        let transport = RecordingTransport::default();
        let subject = Mailer::new(transport.clone(), &mail_settings());
        let submission = submission(valid_form());

        let composed = subject.compose(&submission.validate().unwrap()).unwrap();
        let raw = String::from_utf8_lossy(&composed.acknowledgement.formatted()).into_owned();

        expect_that!(
            header(&raw, "Reply-To"),
            some(contains_substring("cisco@ramxdigital.com"))
        );
        expect_that!(
            header(&raw, "From"),
            some(contains_substring("noreply@ramxdigital.com"))
        );
        expect_that!(
            header(&raw, "Subject"),
            some(eq("We've received your message - RamXDigital"))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn fails_when_transport_rejects_message() {
        let subject = Mailer::new(RecordingTransport::failing("mailbox full"), &mail_settings());
        let submission = submission(valid_form());

        let result = subject.dispatch(&submission.validate().unwrap()).await;

        expect_that!(
            result,
            err(displays_as(contains_substring("mailbox full")))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn fails_when_dispatch_exceeds_timeout() {
        let transport = RecordingTransport::delayed(Duration::from_millis(500));
        let subject = Mailer::new(
            transport.clone(),
            &MailSettings {
                timeout: Duration::from_millis(50),
                ..mail_settings()
            },
        );
        let submission = submission(valid_form());

        let result = subject.dispatch(&submission.validate().unwrap()).await;

        expect_that!(
            result.map_err(|e| matches!(e, DispatchError::TimedOut(_))),
            err(eq(true))
        );
        expect_that!(transport.sent(), empty());
    }
}
