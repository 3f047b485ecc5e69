//! Authentication primitives.
//!
//! Provides password hashing, JWT issuance/verification and refresh-token
//! digests shared by the session service and the HTTP layer.

pub mod jwt;
pub mod password;
pub mod secret;

use thiserror::Error;

use crate::store::StoreError;

/// Session-level errors, as seen by callers of [`crate::session::SessionService`].
///
/// Business-rule failures are stable and safe to surface to clients.
/// Everything else collapses into `Internal`, whose message is for logs only.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email already registered")]
    DuplicatePrincipal,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    Unauthenticated,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateKey => AuthError::DuplicatePrincipal,
            other => AuthError::Internal(other.to_string()),
        }
    }
}
