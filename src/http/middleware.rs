//! Axum middleware that enforces a rule in front of a route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::ratelimit::{AdmissionPolicy, Decision, RateLimitInfo, RequestIdentity, Rule};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// An authenticated caller, inserted into request extensions by upstream
/// authentication middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated(pub String);

/// State for one rate-limited route.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    policy: AdmissionPolicy,
    rule: Arc<Rule>,
}

impl RateLimitState {
    /// Bind `rule` to `policy`, failing if the store cannot enforce it.
    pub fn new(policy: AdmissionPolicy, rule: Rule) -> Result<Self> {
        policy.validate(&rule)?;
        Ok(Self {
            policy,
            rule: Arc::new(rule),
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }
}

/// Collect what the limiter needs to know about the caller.
pub fn request_identity(req: &Request) -> RequestIdentity {
    let forwarded_for = req
        .headers()
        .get(&X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());

    let principal = req
        .extensions()
        .get::<Authenticated>()
        .map(|a| a.0.clone());

    RequestIdentity {
        forwarded_for,
        peer,
        principal,
    }
}

/// Admit or short-circuit the request under the state's rule.
///
/// Use with [`axum::middleware::from_fn_with_state`].
#[instrument(skip_all, fields(rule = %state.rule.name(), path = %req.uri().path()))]
pub async fn rate_limit(State(state): State<RateLimitState>, req: Request, next: Next) -> Response {
    let identity = request_identity(&req);

    match state.policy.admit(&identity, &state.rule) {
        Decision::Admitted(info) => {
            let mut response = next.run(req).await;
            apply_rate_limit_headers(response.headers_mut(), &info);
            response
        }
        Decision::Rejected(info) => {
            debug!(retry_after_secs = ?info.retry_after_secs, "Rejecting request");
            rate_limited_response(&info)
        }
        Decision::AuthRequired => unauthorized_response(),
    }
}

/// Write limit, remaining and reset (and retry-after when rejected).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(info.reset_at_secs));

    if let Some(retry_after) = info.retry_after_secs {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

/// `429 Too Many Requests` with back-off metadata.
pub fn rate_limited_response(info: &RateLimitInfo) -> Response {
    let retry_after = info.retry_after_secs.unwrap_or(1);
    let body = json!({
        "error": "rate_limit_exceeded",
        "message": format!("Too many requests, please retry in {} seconds", retry_after),
        "retry_after": retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_rate_limit_headers(response.headers_mut(), info);
    response
}

/// `401 Unauthorized` for principal-scoped rules hit anonymously.
pub fn unauthorized_response() -> Response {
    let body = json!({
        "error": "unauthorized",
        "message": "Authentication required",
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Trust a principal header set by an upstream gateway.
///
/// Use with [`axum::middleware::from_fn_with_state`]; the state is the
/// header name.
pub async fn principal_from_header(
    State(header_name): State<HeaderName>,
    mut req: Request,
    next: Next,
) -> Response {
    let principal = req
        .headers()
        .get(&header_name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    if let Some(principal) = principal {
        req.extensions_mut().insert(Authenticated(principal));
    }

    next.run(req).await
}
