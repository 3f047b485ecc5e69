//! In-memory stores for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{PrincipalStore, SecretStore, StoreError};
use crate::auth::secret::hash_refresh_token;
use crate::models::auth::{NewRefreshToken, NewUser, RefreshTokenRecord, User, UserWithPassword};

#[derive(Debug, Default)]
struct Users {
    next_id: i64,
    by_id: HashMap<i64, UserWithPassword>,
}

/// `PrincipalStore` backed by a `HashMap`. IDs start at 1.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    inner: Mutex<Users>,
}

impl MemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserWithPassword>, StoreError> {
        let users = self.inner.lock();
        Ok(users.by_id.values().find(|u| u.user.email == email).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.inner.lock();
        if users.by_id.values().any(|u| u.user.email == user.email) {
            return Err(StoreError::DuplicateKey);
        }
        users.next_id += 1;
        let created = User {
            id: users.next_id,
            email: user.email,
            display_name: user.display_name,
            description: String::new(),
            icon_url: String::new(),
            external_url: String::new(),
        };
        users.by_id.insert(
            created.id,
            UserWithPassword {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().by_id.get(&id).map(|u| u.user.clone()))
    }
}

#[derive(Debug, Default)]
struct Records {
    next_id: i64,
    by_hash: HashMap<String, RefreshTokenRecord>,
}

/// `SecretStore` backed by a `HashMap` keyed by token digest.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    inner: Mutex<Records>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<RefreshTokenRecord> {
        self.inner.lock().by_hash.values().cloned().collect()
    }

    /// Overwrite the expiry of the record stored for `raw_token`.
    pub fn set_expiry(&self, raw_token: &str, expires_at: chrono::DateTime<Utc>) -> bool {
        match self.inner.lock().by_hash.get_mut(&hash_refresh_token(raw_token)) {
            Some(record) => {
                record.expires_at = expires_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn insert(
        &self,
        record: NewRefreshToken,
        raw_token: &str,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let token_hash = hash_refresh_token(raw_token);
        let mut records = self.inner.lock();
        if records.by_hash.contains_key(&token_hash) {
            return Err(StoreError::DuplicateKey);
        }
        records.next_id += 1;
        let stored = RefreshTokenRecord {
            id: records.next_id,
            user_id: record.user_id,
            token_hash: token_hash.clone(),
            expires_at: record.expires_at,
            created_at: Utc::now(),
            last_used_at: None,
        };
        records.by_hash.insert(token_hash, stored.clone());
        Ok(stored)
    }

    async fn find_by_raw_secret(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let records = self.inner.lock();
        Ok(records.by_hash.get(&hash_refresh_token(raw_token)).cloned())
    }

    async fn touch_last_used(&self, id: i64) -> Result<(), StoreError> {
        let mut records = self.inner.lock();
        if let Some(record) = records.by_hash.values_mut().find(|r| r.id == id) {
            record.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
        let mut records = self.inner.lock();
        let before = records.by_hash.len();
        records.by_hash.retain(|_, r| r.user_id != user_id);
        Ok((before - records.by_hash.len()) as u64)
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut records = self.inner.lock();
        let before = records.by_hash.len();
        records.by_hash.retain(|_, r| r.expires_at > now);
        Ok((before - records.by_hash.len()) as u64)
    }
}
