use anyhow::Context;
use contact_relay::{Application, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in production.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env().context("Invalid configuration")?;
    info!(
        "SMTP relay {}:{} ({:?}, credentials {})",
        settings.smtp.host,
        settings.smtp.port,
        settings.smtp.security,
        if settings.smtp.password.is_some() {
            "configured"
        } else {
            "not configured"
        }
    );
    info!(
        "reCAPTCHA verification {}",
        if settings.recaptcha.secret.is_some() {
            "enabled"
        } else {
            "disabled, submissions pass unverified"
        }
    );
    info!("Mail templates: {:?}", settings.mail.templates);

    let application = Application::build(settings)
        .await
        .context("Unable to start server")?;
    info!("Listening on {}", application.local_addr()?);
    application.run_until_stopped().await?;
    Ok(())
}
