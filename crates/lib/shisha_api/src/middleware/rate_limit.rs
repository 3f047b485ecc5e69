//! Rate limiting middleware for the credential endpoints.
//!
//! Keys each request by peer IP and asks the shared [`ActorRateLimiter`]
//! for admission before any handler work (and any password hashing) runs.
//!
//! [`ActorRateLimiter`]: shisha_core::rate_limit::ActorRateLimiter

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::AppState;
use crate::error::AppError;

/// Actor key used when the peer address is unavailable.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Axum middleware: rejects with 429 once the caller's bucket is empty.
pub async fn limit_by_actor(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ACTOR.to_string());

    if !state.limiter.allow(&actor) {
        warn!(ip = %actor, path = %request.uri().path(), "rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    Ok(next.run(request).await)
}
