//! Refresh-token digests.
//!
//! Only the SHA-256 hex digest of a refresh token is ever persisted.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 hash a raw refresh token for storage and lookup.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
