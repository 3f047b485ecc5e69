//! Password hashing via bcrypt.

use super::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Lowest cost bcrypt accepts.
pub const MIN_BCRYPT_COST: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_BCRYPT_COST: u32 = 31;

/// bcrypt only reads this many bytes of input; longer passwords are refused
/// rather than silently truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Salted, adaptive password hasher.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Create a hasher with the given bcrypt cost (clamped to bcrypt's valid range).
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_BCRYPT_COST, MAX_BCRYPT_COST),
        }
    }

    /// Hash a password with a fresh random salt.
    ///
    /// An empty password, or one over [`MAX_PASSWORD_BYTES`], is refused as a
    /// hashing failure.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        if password.is_empty() {
            return Err(AuthError::Internal("bcrypt hash: empty password".into()));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::Internal("bcrypt hash: password too long".into()));
        }
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash.
    ///
    /// `Ok(false)` means mismatch; `Err` means the stored hash is malformed.
    /// Passwords over [`MAX_PASSWORD_BYTES`] never match.
    pub fn verify(&self, hash: &str, password: &str) -> Result<bool, AuthError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Ok(false);
        }
        bcrypt::verify(password, hash)
            .map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}
