//! JWT token generation and verification.
//!
//! Access and refresh tokens share one shape (`uid`, `exp`, `iat`) and are
//! signed with a single HS256 secret. Refresh tokens additionally carry a
//! random `jti` so that every issued refresh token has a unique digest.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use thiserror::Error;

use super::AuthError;
use crate::models::auth::TokenClaims;

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// The only algorithm tokens may be signed with.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Length of the random refresh-token nonce.
const JTI_LEN: usize = 32;

/// Why a token failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Bad shape, bad signature or foreign algorithm.
    #[error("invalid token")]
    Invalid,
    /// Signature checks out but `exp` has passed.
    #[error("token has expired")]
    Expired,
}

/// Signs and verifies bearer tokens with one process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from the signing secret. An empty secret is refused.
    pub fn new(secret: &[u8]) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Internal("jwt secret must not be empty".into()));
        }
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Generate a signed access token (15 min expiry).
    pub fn issue_access(&self, user_id: i64) -> Result<String, AuthError> {
        self.issue_at(user_id, ACCESS_TOKEN_EXPIRY_SECS, None, Utc::now())
    }

    /// Generate a signed refresh token (7 day expiry).
    ///
    /// The returned value is shown to the client once; only its digest is stored.
    pub fn issue_refresh(&self, user_id: i64) -> Result<String, AuthError> {
        self.issue_at(
            user_id,
            REFRESH_TOKEN_EXPIRY_SECS,
            Some(generate_jti()),
            Utc::now(),
        )
    }

    /// Verify a token, returning its claims on success.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }

    /// Verify a token presented as an access credential.
    ///
    /// Refresh tokens (those carrying a `jti`) are refused here, so a revoked
    /// refresh token cannot stand in for an access token.
    pub fn verify_access(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.jti.is_some() {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    /// Verify a token presented as a refresh credential. Access tokens are refused.
    pub fn verify_refresh(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let claims = self.verify(token)?;
        if claims.jti.is_none() {
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }

    pub(crate) fn issue_at(
        &self,
        user_id: i64,
        lifetime_secs: i64,
        jti: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = TokenClaims {
            uid: user_id,
            exp: (now + Duration::seconds(lifetime_secs)).timestamp(),
            iat: now.timestamp(),
            jti,
        };
        encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }
}

fn generate_jti() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(JTI_LEN)
        .map(char::from)
        .collect()
}
