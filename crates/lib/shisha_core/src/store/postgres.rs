//! PostgreSQL-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{PrincipalStore, SecretStore, StoreError};
use crate::auth::secret::hash_refresh_token;
use crate::models::auth::{NewRefreshToken, NewUser, RefreshTokenRecord, User, UserWithPassword};

type UserRow = (i64, String, String, String, String, String);

type RefreshTokenRow = (
    i64,
    i64,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn user_from_row(
    (id, email, display_name, description, icon_url, external_url): UserRow,
) -> User {
    User {
        id,
        email,
        display_name,
        description,
        icon_url,
        external_url,
    }
}

fn record_from_row(
    (id, user_id, token_hash, expires_at, created_at, last_used_at): RefreshTokenRow,
) -> RefreshTokenRecord {
    RefreshTokenRecord {
        id,
        user_id,
        token_hash,
        expires_at,
        created_at,
        last_used_at,
    }
}

/// Map unique-constraint violations to [`StoreError::DuplicateKey`].
fn map_write_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey,
        _ => StoreError::Db(e),
    }
}

/// `users` table access.
#[derive(Debug, Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, StoreError> {
        let row = sqlx::query_as::<_, (i64, String, String, String, String, String, String)>(
            "SELECT id, email, display_name, description, icon_url, external_url, password_hash \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(id, email, display_name, description, icon_url, external_url, password_hash)| {
                UserWithPassword {
                    user: user_from_row((
                        id,
                        email,
                        display_name,
                        description,
                        icon_url,
                        external_url,
                    )),
                    password_hash,
                }
            },
        ))
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (email, display_name, password_hash) VALUES ($1, $2, $3) \
             RETURNING id, email, display_name, description, icon_url, external_url",
        )
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_err)?;
        Ok(user_from_row(row))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, description, icon_url, external_url \
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }
}

/// `refresh_tokens` table access.
#[derive(Debug, Clone)]
pub struct PgSecretStore {
    pool: PgPool,
}

impl PgSecretStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn insert(
        &self,
        record: NewRefreshToken,
        raw_token: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let token_hash = hash_refresh_token(raw_token);
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3) \
             RETURNING id, user_id, token_hash, expires_at, created_at, last_used_at",
        )
        .bind(record.user_id)
        .bind(&token_hash)
        .bind(record.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_err)?;
        debug!(token_id = row.0, user_id = record.user_id, "refresh token stored");
        Ok(record_from_row(row))
    }

    async fn find_by_raw_secret(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            "SELECT id, user_id, token_hash, expires_at, created_at, last_used_at \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(hash_refresh_token(raw_token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(record_from_row))
    }

    async fn touch_last_used(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE refresh_tokens SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
