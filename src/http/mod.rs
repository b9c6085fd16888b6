//! HTTP adapter: axum middleware and a small server around it.

mod middleware;
mod server;

pub use middleware::{
    apply_rate_limit_headers, principal_from_header, rate_limit, rate_limited_response,
    request_identity, unauthorized_response, Authenticated, RateLimitState, X_FORWARDED_FOR,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::{build_router, HttpServer};
