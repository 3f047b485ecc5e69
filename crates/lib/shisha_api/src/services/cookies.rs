//! Cookie service: build and clear httpOnly auth cookies.

use axum_extra::extract::cookie::{Cookie, SameSite};
use shisha_core::auth::jwt::{ACCESS_TOKEN_EXPIRY_SECS, REFRESH_TOKEN_EXPIRY_SECS};
use time::Duration;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "access_token";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

fn auth_cookie(name: &'static str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Build a httpOnly cookie for the access token (15 minutes).
pub fn access_cookie(token: &str, secure: bool) -> Cookie<'static> {
    auth_cookie(
        ACCESS_COOKIE,
        token.to_string(),
        Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS),
        secure,
    )
}

/// Build a httpOnly cookie for the refresh token (7 days).
pub fn refresh_cookie(token: &str, secure: bool) -> Cookie<'static> {
    auth_cookie(
        REFRESH_COOKIE,
        token.to_string(),
        Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS),
        secure,
    )
}

/// Build an expired cookie to clear the access token.
pub fn clear_access_cookie(secure: bool) -> Cookie<'static> {
    auth_cookie(ACCESS_COOKIE, String::new(), Duration::ZERO, secure)
}

/// Build an expired cookie to clear the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    auth_cookie(REFRESH_COOKIE, String::new(), Duration::ZERO, secure)
}
