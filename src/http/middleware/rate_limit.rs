//! Per-client rate limiting middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::http::response::{rate_limit_exceeded_response, server_error_response};
use crate::limiter::LimiterRegistry;
use crate::observability::metrics;

/// Admit or reject the request based on the client's IP address.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<LimiterRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>().copied() else {
        tracing::error!(uri = %request.uri(), "Peer address missing, cannot rate limit");
        return server_error_response();
    };

    let client = addr.ip().to_string();
    if limiter.admit(&client) {
        next.run(request).await
    } else {
        tracing::debug!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited();
        rate_limit_exceeded_response()
    }
}
