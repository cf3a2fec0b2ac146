use crate::{
    config::{ApplicationSettings, Settings},
    handler::ContactFormMessageHandler,
    mailer::{smtp_transport, MailTransport, Mailer},
    rate_limit::RateLimiter,
    recaptcha::RecaptchaVerifier,
    routes::{check_health, contact, rate_limit, RateLimitState},
    webhook::WebhookForwarder,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Unable to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    #[error("Unable to configure SMTP transport: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("Unable to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// The bound listener plus everything needed to serve on it.
pub struct Application {
    listener: TcpListener,
    router: Router,
    limiter: Arc<RateLimiter>,
}

impl Application {
    pub async fn build(settings: Settings) -> Result<Self, StartupError> {
        let transport = smtp_transport(&settings.smtp)?;
        Self::build_with_transport(settings, transport).await
    }

    pub async fn build_with_transport<T: MailTransport>(
        settings: Settings,
        transport: T,
    ) -> Result<Self, StartupError> {
        let webhook = settings
            .webhook_url
            .as_deref()
            .map(|url| WebhookForwarder::new(url, settings.mail.timeout))
            .transpose()?;
        let handler = ContactFormMessageHandler::new(
            Mailer::new(transport, &settings.mail),
            RecaptchaVerifier::new(settings.recaptcha)?,
            webhook,
        );
        let limiter = Arc::new(RateLimiter::new(
            settings.rate_limit.max_requests,
            settings.rate_limit.window,
        ));
        let router = router(Arc::new(handler), limiter.clone(), &settings.application);
        let listener =
            TcpListener::bind((settings.application.host, settings.application.port)).await?;
        Ok(Self {
            listener,
            router,
            limiter,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until the process receives Ctrl-C.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweeper = tokio::spawn(evict_periodically(self.limiter));
        let result = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;
        sweeper.abort();
        result
    }
}

pub fn router<T: MailTransport>(
    handler: Arc<ContactFormMessageHandler<T>>,
    limiter: Arc<RateLimiter>,
    settings: &ApplicationSettings,
) -> Router {
    let rate_limit_state = RateLimitState {
        limiter,
        trust_proxy: settings.trust_proxy,
    };
    Router::new()
        .route(
            "/api/contact",
            post(contact::<T>).route_layer(middleware::from_fn_with_state(
                rate_limit_state,
                rate_limit,
            )),
        )
        .route("/api/health", get(check_health))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .layer(cors_layer(&settings.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) if value != "*" => Some(value),
            _ => {
                warn!("Ignoring unusable CORS origin {origin:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

async fn evict_periodically(limiter: Arc<RateLimiter>) {
    let mut interval = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let evicted = limiter.evict_expired();
        if evicted > 0 {
            debug!("Evicted {evicted} expired rate limit windows");
        }
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Unable to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
