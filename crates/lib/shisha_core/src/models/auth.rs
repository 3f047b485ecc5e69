//! Authentication domain models.
//!
//! These are internal domain models. The HTTP layer wraps them in its own
//! response envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub description: String,
    pub icon_url: String,
    pub external_url: String,
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Data needed to create a user row.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
}

/// Registration input as received by the session service.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Refresh token record stored in the database.
///
/// `token_hash` is the SHA-256 hex digest of the raw token.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Data needed to insert a refresh token record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// JWT claims embedded in access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User ID.
    pub uid: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Random nonce, present on refresh tokens only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}
