//! Persistence contracts for principals and refresh-token records.
//!
//! The session service only talks to these traits. `postgres` holds the
//! production implementations; `memory` holds in-process ones for tests and
//! local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{NewRefreshToken, NewUser, RefreshTokenRecord, User, UserWithPassword};

pub use memory::{MemoryPrincipalStore, MemorySecretStore};
pub use postgres::{PgPrincipalStore, PgSecretStore};

/// Store-level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint (e.g. email) rejected the write.
    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Lookup and creation of credential-bearing principals.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Fetch a user (with password hash) by exact email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, StoreError>;

    /// Insert a user. Fails with [`StoreError::DuplicateKey`] if the email is taken.
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Fetch a user by ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
}

/// Persistence of hashed refresh-token records.
///
/// Implementations receive the raw token and must store only
/// [`crate::auth::secret::hash_refresh_token`] of it.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Store a record for `raw_token`, keyed by its digest.
    async fn insert(
        &self,
        record: NewRefreshToken,
        raw_token: &str,
    ) -> Result<RefreshTokenRecord, StoreError>;

    /// Find the record whose digest matches `raw_token`, expired or not.
    async fn find_by_raw_secret(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Set `last_used_at = now` on a record.
    async fn touch_last_used(&self, id: i64) -> Result<(), StoreError>;

    /// Delete every record belonging to a user. Returns the number removed.
    async fn delete_all_for_user(&self, user_id: i64) -> Result<u64, StoreError>;

    /// Delete records whose expiry has passed. Returns the number removed.
    async fn delete_expired(&self) -> Result<u64, StoreError>;
}
