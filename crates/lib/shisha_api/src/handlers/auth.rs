//! Authentication request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use shisha_core::auth::password::MAX_PASSWORD_BYTES;
use shisha_core::models::auth::RegisterInput;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, AppJson, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{AuthResponse, LoginRequest, MessageResponse, RegisterRequest};
use crate::services::cookies::{
    REFRESH_COOKIE, access_cookie, clear_access_cookie, clear_refresh_cookie, refresh_cookie,
};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_CHARS: usize = 12;

fn validate_registration(body: &RegisterRequest) -> AppResult<()> {
    if !body.email.contains('@') {
        return Err(AppError::Validation("email is invalid".into()));
    }
    if body.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    if body.password.len() > MAX_PASSWORD_BYTES {
        return Err(AppError::Validation(format!(
            "password must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    if body.display_name.trim().is_empty() {
        return Err(AppError::Validation("display_name is required".into()));
    }
    Ok(())
}

/// `POST /auth/register`: create a new user account.
pub async fn register_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    validate_registration(&body).inspect_err(|e| {
        warn!(email = %body.email, error = %e, "registration rejected");
    })?;

    let user = state
        .session
        .register(RegisterInput {
            email: body.email,
            password: body.password,
            display_name: body.display_name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user })))
}

/// `POST /auth/login`: authenticate and set access/refresh cookies.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<AuthResponse>)> {
    let outcome = state.session.login(&body.email, &body.password).await?;
    let secure = state.config.secure_cookies;
    let jar = jar
        .add(access_cookie(&outcome.access_token, secure))
        .add(refresh_cookie(&outcome.refresh_token, secure));
    Ok((jar, Json(AuthResponse { user: outcome.user })))
}

/// `POST /auth/refresh`: mint a new access token from the refresh cookie.
pub async fn refresh_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let Some(refresh_token) = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
    else {
        warn!("refresh attempted without refresh token");
        return Err(AppError::Unauthorized("refresh token required".into()));
    };

    let access_token = state.session.refresh(&refresh_token).await?;
    let jar = jar.add(access_cookie(&access_token, state.config.secure_cookies));
    Ok((
        jar,
        Json(MessageResponse {
            message: "token refreshed".into(),
        }),
    ))
}

/// `POST /auth/logout`: revoke all refresh tokens and clear cookies. Requires authentication.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    let removed = state.session.logout(user.user_id).await?;
    info!(user_id = user.user_id, removed, "sessions revoked");
    let secure = state.config.secure_cookies;
    let jar = jar
        .add(clear_access_cookie(secure))
        .add(clear_refresh_cookie(secure));
    Ok((
        jar,
        Json(MessageResponse {
            message: "logged out".into(),
        }),
    ))
}

/// `GET /auth/me`: the authenticated user's profile.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<AuthResponse>> {
    let user = state.session.current_user(user.user_id).await?;
    Ok(Json(AuthResponse { user }))
}
