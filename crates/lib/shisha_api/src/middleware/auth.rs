//! Authentication middleware: access-token extraction and JWT verification.
//!
//! The token is taken from the `access_token` cookie first, then from an
//! `Authorization: Bearer <token>` header.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::ACCESS_COOKIE;

/// Identity of the caller, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

/// Where the access token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenSource {
    Cookie,
    Header,
}

/// Axum middleware: resolves the access token, verifies it, and injects
/// [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_owned();

    let Some((token, source)) = extract_token(request.headers()) else {
        warn!(path = %path, "no access token provided");
        return Err(AppError::Unauthorized("authorization required".into()));
    };

    let claims = state.session.codec().verify_access(&token).map_err(|e| {
        warn!(path = %path, error = %e, "invalid access token");
        AppError::Unauthorized("invalid or expired token".into())
    })?;

    debug!(user_id = claims.uid, path = %path, ?source, "user authenticated");
    request.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.uid,
    });

    Ok(next.run(request).await)
}

fn extract_token(headers: &HeaderMap) -> Option<(String, TokenSource)> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(ACCESS_COOKIE)
        && !cookie.value().is_empty()
    {
        return Some((cookie.value().to_string(), TokenSource::Cookie));
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(|t| (t.to_string(), TokenSource::Header))
}

/// Parse `Bearer <token>`: case-sensitive scheme, one space, non-empty token.
fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?;
    if token.is_empty() || token.starts_with(' ') {
        return None;
    }
    Some(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    use super::*;

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Bearer  abc"), None);
        assert_eq!(bearer_token("bearer abc"), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearerabc"), None);
    }

    #[test]
    fn cookie_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("access_token=from-cookie"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_token(&headers),
            Some(("from-cookie".to_string(), TokenSource::Cookie))
        );
    }

    #[test]
    fn empty_cookie_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("access_token="));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            extract_token(&headers),
            Some(("from-header".to_string(), TokenSource::Header))
        );
    }

    #[test]
    fn nothing_yields_none() {
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }
}
