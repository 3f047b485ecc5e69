//! # shisha_core
//!
//! Session and credential management for Shisha: password hashing, token
//! issuance, refresh-token persistence, the session service and per-actor
//! rate limiting.

pub mod auth;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod session;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
