use crate::{
    error::ContactFormError,
    handler::ContactFormMessageHandler,
    mailer::MailTransport,
    rate_limit::{RateLimitDecision, RateLimiter},
    submission::{iso_timestamp, ContactFormMessage},
};
use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use chrono::Utc;
use serde::Serialize;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::debug;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// A contact form body, either JSON or URL-encoded.
pub struct ContactPayload(pub ContactFormMessage);

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for ContactPayload {
    type Rejection = ContactFormError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            let Form(message) = Form::<ContactFormMessage>::from_request(request, state)
                .await
                .map_err(|rejection| {
                    debug!("Unable to read form body: {rejection}");
                    ContactFormError::malformed_body()
                })?;
            Ok(Self(message))
        } else {
            let Json(message) = Json::<ContactFormMessage>::from_request(request, state)
                .await
                .map_err(|rejection| {
                    debug!("Unable to read JSON body: {rejection}");
                    ContactFormError::malformed_body()
                })?;
            Ok(Self(message))
        }
    }
}

/// The caller address the rate limiter counted the request against.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    /// Whether `X-Forwarded-For` can be believed.
    pub trust_proxy: bool,
}

pub async fn contact<T: MailTransport>(
    State(handler): State<Arc<ContactFormMessageHandler<T>>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    payload: Result<ContactPayload, ContactFormError>,
) -> Response {
    match payload {
        Ok(ContactPayload(message)) => handler.handle(message, ip).await,
        Err(error) => {
            error.log();
            error.into_response()
        }
    }
}

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    timestamp: String,
}

pub async fn check_health() -> Json<Health> {
    Json(Health {
        status: "OK",
        timestamp: iso_timestamp(Utc::now()),
    })
}

/// Counts the request against its caller and refuses it once the window is used up.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer.ip(), state.trust_proxy);
    let limit = state.limiter.max_requests();
    match state.limiter.check(ip) {
        RateLimitDecision::Allowed { remaining } => {
            request.extensions_mut().insert(ClientIp(ip));
            let mut response = next.run(request).await;
            insert_rate_limit_headers(response.headers_mut(), limit, remaining);
            response
        }
        RateLimitDecision::Limited { retry_after } => {
            let error = ContactFormError::RateLimited { ip, retry_after };
            error.log();
            let mut response = error.into_response();
            insert_rate_limit_headers(response.headers_mut(), limit, 0);
            response
        }
    }
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
}

fn client_ip(headers: &HeaderMap, peer: IpAddr, trust_proxy: bool) -> IpAddr {
    if !trust_proxy {
        return peer;
    }
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}
