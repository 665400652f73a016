//! Rate limiting middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument};

use super::response::{insert_quota_headers, ApiError};
use super::AppState;
use crate::ratelimit::{Outcome, RequestInfo};

/// Run every request through the rate limiter before it reaches a route.
///
/// Rejected requests get a 429 with the standard error envelope; allowed
/// requests get `X-RateLimit-*` headers on the way out; bypassed requests
/// pass untouched.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let outcome = {
        let info = RequestInfo {
            path: request.uri().path(),
            headers: request.headers(),
            remote_addr,
        };
        state.limiter.check(&info).await
    };

    let config = state.limiter.config();
    match outcome {
        Outcome::Bypassed => next.run(request).await,
        Outcome::Rejected { retry_after_secs } => {
            debug!(retry_after_secs, "Rejecting request over quota");
            ApiError::rate_limited(config.limit, config.window_secs, retry_after_secs)
                .into_response()
        }
        Outcome::Allowed {
            remaining,
            reset_secs,
        } => {
            let mut response = next.run(request).await;
            insert_quota_headers(response.headers_mut(), config.limit, remaining, reset_secs);
            response
        }
    }
}
