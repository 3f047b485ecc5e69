//! # shisha_api
//!
//! HTTP API library for Shisha sessions.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use shisha_core::auth::AuthError;
use shisha_core::auth::jwt::TokenCodec;
use shisha_core::auth::password::PasswordHasher;
use shisha_core::rate_limit::ActorRateLimiter;
use shisha_core::session::SessionService;
use shisha_core::store::{PrincipalStore, SecretStore};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, health};

/// Route paths, relative to [`routes::API_PREFIX`].
pub mod routes {
    pub const API_PREFIX: &str = "/api/v1";
    pub const GET_HEALTH: &str = "/health";
    pub const POST_AUTH_REGISTER: &str = "/auth/register";
    pub const POST_AUTH_LOGIN: &str = "/auth/login";
    pub const POST_AUTH_REFRESH: &str = "/auth/refresh";
    pub const POST_AUTH_LOGOUT: &str = "/auth/logout";
    pub const GET_AUTH_ME: &str = "/auth/me";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registration, login, refresh and logout.
    pub session: SessionService,
    /// Per-IP admission for the credential endpoints.
    pub limiter: Arc<ActorRateLimiter>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    /// Wire a session service and rate limiter over the given stores.
    pub fn new(
        config: ApiConfig,
        principals: Arc<dyn PrincipalStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, AuthError> {
        let codec = TokenCodec::new(config.jwt_secret.as_bytes())?;
        let hasher = PasswordHasher::new(config.bcrypt_cost);
        Ok(Self {
            session: SessionService::new(principals, secrets, hasher, codec),
            limiter: Arc::new(ActorRateLimiter::new(config.rate_limit)),
            config,
        })
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new().route(routes::GET_HEALTH, get(health::health_handler));

    // Credential endpoints, gated per client IP
    let limited = Router::new()
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::limit_by_actor,
        ));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    let api = Router::new().merge(public).merge(limited).merge(protected);

    Router::new()
        .nest(routes::API_PREFIX, api)
        .layer(cors)
        .with_state(state)
}
