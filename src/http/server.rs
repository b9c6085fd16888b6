//! HTTP server exposing rate-limited demonstration routes.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::HeaderName,
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{principal_from_header, rate_limit, RateLimitState};
use crate::error::{RatewardenError, Result};
use crate::ratelimit::{AdmissionPolicy, RuleSet};

/// Build a router with one route per rule at `/{rule}`.
///
/// Each route is guarded by its rule. `/healthz` is never limited. When
/// `principal_header` is set, its value is trusted as the authenticated
/// principal.
pub fn build_router(
    policy: &AdmissionPolicy,
    rules: &RuleSet,
    principal_header: Option<HeaderName>,
) -> Result<Router> {
    let mut router = Router::new().route("/healthz", get(healthz));

    for rule in rules.iter() {
        let state = RateLimitState::new(policy.clone(), rule.clone())?;
        let path = format!("/{}", rule.name());

        info!(
            path = %path,
            window_ms = rule.window().as_millis() as u64,
            max = rule.max(),
            key_by = ?rule.key_by(),
            "Mounting rate-limited route"
        );

        let route = Router::new()
            .route(&path, get(protected).post(protected))
            .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
            .with_state(state);
        router = router.merge(route);
    }

    if let Some(header_name) = principal_header {
        router = router.layer(middleware::from_fn_with_state(header_name, principal_from_header));
    }

    Ok(router)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn protected(State(state): State<RateLimitState>) -> Json<Value> {
    Json(json!({ "rule": state.rule().name(), "status": "ok" }))
}

/// HTTP server for the rate-limited routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            RatewardenError::Server(e.to_string())
        })
    }
}
