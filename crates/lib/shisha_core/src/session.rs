//! Session service: registration, login, refresh, logout and "who am I".
//!
//! Owns every business rule of the credential lifecycle. Persistence goes
//! through [`PrincipalStore`] and [`SecretStore`]; tokens through
//! [`TokenCodec`]; password hashing through [`PasswordHasher`].

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::auth::AuthError;
use crate::auth::jwt::{REFRESH_TOKEN_EXPIRY_SECS, TokenCodec};
use crate::auth::password::PasswordHasher;
use crate::models::auth::{NewRefreshToken, NewUser, RegisterInput, User};
use crate::store::{PrincipalStore, SecretStore, StoreError};

/// Tokens handed to the client after a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Orchestrates the credential lifecycle over injected collaborators.
#[derive(Clone)]
pub struct SessionService {
    principals: Arc<dyn PrincipalStore>,
    secrets: Arc<dyn SecretStore>,
    hasher: PasswordHasher,
    codec: TokenCodec,
    // Checked on the unknown-email login path.
    dummy_hash: String,
}

/// Plaintext behind `dummy_hash`; never a real credential.
const DUMMY_PASSWORD: &str = "shisha-timing-equalizer";

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("hasher", &self.hasher)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl SessionService {
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        secrets: Arc<dyn SecretStore>,
        hasher: PasswordHasher,
        codec: TokenCodec,
    ) -> Self {
        let dummy_hash = hasher.hash(DUMMY_PASSWORD).unwrap_or_else(|e| {
            error!(error = %e, "failed to prepare dummy password hash");
            String::new()
        });
        Self {
            principals,
            secrets,
            hasher,
            codec,
            dummy_hash,
        }
    }

    /// The codec used to mint and check tokens.
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Register a new user account.
    ///
    /// Password length policy is enforced by the caller; an empty password
    /// still fails here as a hashing error.
    pub async fn register(&self, input: RegisterInput) -> Result<User, AuthError> {
        info!(email = %input.email, "registering new user");

        if self.principals.find_by_email(&input.email).await?.is_some() {
            warn!(email = %input.email, "email already exists");
            return Err(AuthError::DuplicatePrincipal);
        }

        let password_hash = self.hasher.hash(&input.password).inspect_err(|e| {
            error!(email = %input.email, error = %e, "failed to hash password");
        })?;

        let user = self
            .principals
            .create(NewUser {
                email: input.email.clone(),
                display_name: input.display_name,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateKey => {
                    warn!(email = %input.email, "email claimed concurrently");
                    AuthError::DuplicatePrincipal
                }
                other => {
                    error!(email = %input.email, error = %other, "failed to create user");
                    AuthError::Internal(format!("create user: {other}"))
                }
            })?;

        info!(user_id = user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Authenticate with email + password.
    ///
    /// Unknown email and wrong password produce the same error.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        info!(email, "user login attempt");

        let Some(found) = self.principals.find_by_email(email).await? else {
            let _ = self.hasher.verify(&self.dummy_hash, password);
            warn!(email, "login failed: user not found");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.hasher.verify(&found.password_hash, password)? {
            warn!(user_id = found.user.id, "login failed: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let user = found.user;
        let access_token = self.codec.issue_access(user.id)?;
        let refresh_token = self.codec.issue_refresh(user.id)?;

        let expires_at = Utc::now() + Duration::seconds(REFRESH_TOKEN_EXPIRY_SECS);
        self.secrets
            .insert(
                NewRefreshToken {
                    user_id: user.id,
                    expires_at,
                },
                &refresh_token,
            )
            .await
            .map_err(|e| {
                error!(user_id = user.id, error = %e, "failed to save refresh token");
                AuthError::Internal(format!("store refresh token: {e}"))
            })?;

        info!(user_id = user.id, "user logged in");
        Ok(LoginOutcome {
            user,
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The refresh token itself is not rotated. Every rejection surfaces as
    /// `Unauthenticated` regardless of which check failed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.codec.verify_refresh(refresh_token).map_err(|e| {
            warn!(error = %e, "refresh rejected: token did not verify");
            AuthError::Unauthenticated
        })?;

        let record = self
            .secrets
            .find_by_raw_secret(refresh_token)
            .await
            .map_err(|e| {
                error!(user_id = claims.uid, error = %e, "failed to query refresh token");
                AuthError::Internal(format!("query refresh token: {e}"))
            })?
            .ok_or_else(|| {
                warn!(user_id = claims.uid, "refresh rejected: token not on record");
                AuthError::Unauthenticated
            })?;

        if record.expires_at <= Utc::now() {
            warn!(token_id = record.id, "refresh rejected: record expired");
            return Err(AuthError::Unauthenticated);
        }

        let access_token = self.codec.issue_access(claims.uid)?;

        if let Err(e) = self.secrets.touch_last_used(record.id).await {
            error!(token_id = record.id, error = %e, "failed to update last_used_at");
        }

        info!(user_id = claims.uid, "access token refreshed");
        Ok(access_token)
    }

    /// Revoke every refresh token of a user. Idempotent.
    ///
    /// Access tokens already issued stay valid until they expire.
    pub async fn logout(&self, user_id: i64) -> Result<u64, AuthError> {
        let removed = self
            .secrets
            .delete_all_for_user(user_id)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "failed to delete refresh tokens");
                AuthError::Internal(format!("delete refresh tokens: {e}"))
            })?;
        info!(user_id, removed, "user logged out");
        Ok(removed)
    }

    /// Fetch the user behind an already-verified access token.
    pub async fn current_user(&self, user_id: i64) -> Result<User, AuthError> {
        debug!(user_id, "getting current user");
        self.principals
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| {
                error!(user_id, "authenticated user not found");
                AuthError::Internal(format!("user {user_id} not found"))
            })
    }

    /// Delete expired refresh-token records.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let removed = self.secrets.delete_expired().await.map_err(|e| {
            error!(error = %e, "failed to delete expired refresh tokens");
            AuthError::Internal(format!("delete expired refresh tokens: {e}"))
        })?;
        info!(removed, "expired refresh tokens deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::auth::password::MIN_BCRYPT_COST;
    use crate::auth::secret::{DIGEST_HEX_LEN, hash_refresh_token};
    use crate::models::auth::RefreshTokenRecord;
    use crate::store::{MemoryPrincipalStore, MemorySecretStore};

    const SECRET: &[u8] = b"test-secret-key-for-testing-purpose-at-least-64-characters-long";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET).unwrap()
    }

    fn service_with(secrets: Arc<dyn SecretStore>) -> SessionService {
        SessionService::new(
            Arc::new(MemoryPrincipalStore::new()),
            secrets,
            PasswordHasher::new(MIN_BCRYPT_COST),
            codec(),
        )
    }

    fn service() -> (SessionService, Arc<MemorySecretStore>) {
        let secrets = Arc::new(MemorySecretStore::new());
        (service_with(secrets.clone()), secrets)
    }

    fn input(email: &str, password: &str) -> RegisterInput {
        RegisterInput {
            email: email.to_string(),
            password: password.to_string(),
            display_name: "A".to_string(),
        }
    }

    /// Secret store that refuses inserts, or only `touch_last_used`.
    struct BrokenSecretStore {
        inner: MemorySecretStore,
        fail_touch_only: bool,
    }

    #[async_trait]
    impl SecretStore for BrokenSecretStore {
        async fn insert(
            &self,
            record: NewRefreshToken,
            raw_token: &str,
        ) -> Result<RefreshTokenRecord, StoreError> {
            if self.fail_touch_only {
                return self.inner.insert(record, raw_token).await;
            }
            Err(StoreError::Unavailable("insert refused".into()))
        }

        async fn find_by_raw_secret(
            &self,
            raw_token: &str,
        ) -> Result<Option<RefreshTokenRecord>, StoreError> {
            self.inner.find_by_raw_secret(raw_token).await
        }

        async fn touch_last_used(&self, _id: i64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("touch refused".into()))
        }

        async fn delete_all_for_user(&self, user_id: i64) -> Result<u64, StoreError> {
            self.inner.delete_all_for_user(user_id).await
        }

        async fn delete_expired(&self) -> Result<u64, StoreError> {
            self.inner.delete_expired().await
        }
    }

    #[tokio::test]
    async fn end_to_end_session_lifecycle() {
        let (svc, _) = service();

        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        assert!(user.id > 0);
        assert_eq!(user.email, "a@x.com");

        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        assert!(!outcome.access_token.is_empty());
        assert!(!outcome.refresh_token.is_empty());
        assert_ne!(outcome.access_token, outcome.refresh_token);
        assert_eq!(outcome.user.id, user.id);

        let access = svc.refresh(&outcome.refresh_token).await.unwrap();
        assert_eq!(svc.codec().verify(&access).unwrap().uid, user.id);

        svc.logout(user.id).await.unwrap();
        assert!(matches!(
            svc.refresh(&outcome.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (svc, _) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        assert!(matches!(
            svc.register(input("a@x.com", "otherpassword456")).await,
            Err(AuthError::DuplicatePrincipal)
        ));
    }

    #[tokio::test]
    async fn empty_password_fails_as_internal() {
        let (svc, _) = service();
        assert!(matches!(
            svc.register(input("a@x.com", "")).await,
            Err(AuthError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let (svc, _) = service();
        svc.register(input("known@x.com", "longpassword123"))
            .await
            .unwrap();

        let unknown = svc.login("unknown@x.com", "anything").await.unwrap_err();
        let wrong = svc.login("known@x.com", "wrongpassword").await.unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(format!("{unknown:?}"), format!("{wrong:?}"));
    }

    #[test]
    fn unknown_email_path_hashes_at_configured_cost() {
        let (svc, _) = service();
        assert!(svc.dummy_hash.starts_with("$2b$04$"));
        assert!(svc.hasher.verify(&svc.dummy_hash, DUMMY_PASSWORD).unwrap());
    }

    #[tokio::test]
    async fn raw_refresh_token_is_never_stored() {
        let (svc, secrets) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();

        let records = secrets.records();
        assert_eq!(records.len(), 1);
        let stored = &records[0].token_hash;
        assert_ne!(stored, &outcome.refresh_token);
        assert_eq!(stored.len(), DIGEST_HEX_LEN);
        assert!(!stored.contains('.'));
        assert_eq!(stored, &hash_refresh_token(&outcome.refresh_token));
    }

    #[tokio::test]
    async fn each_login_adds_a_session() {
        let (svc, secrets) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let first = svc.login("a@x.com", "longpassword123").await.unwrap();
        let second = svc.login("a@x.com", "longpassword123").await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(secrets.records().len(), 2);
        assert!(svc.refresh(&first.refresh_token).await.is_ok());
        assert!(svc.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn login_fails_when_refresh_record_cannot_be_saved() {
        let svc = service_with(Arc::new(BrokenSecretStore {
            inner: MemorySecretStore::new(),
            fail_touch_only: false,
        }));
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        assert!(matches!(
            svc.login("a@x.com", "longpassword123").await,
            Err(AuthError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn refresh_survives_last_used_failure() {
        let svc = service_with(Arc::new(BrokenSecretStore {
            inner: MemorySecretStore::new(),
            fail_touch_only: true,
        }));
        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        let access = svc.refresh(&outcome.refresh_token).await.unwrap();
        assert_eq!(svc.codec().verify(&access).unwrap().uid, user.id);
    }

    #[tokio::test]
    async fn refresh_marks_record_used() {
        let (svc, secrets) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        assert!(secrets.records()[0].last_used_at.is_none());
        svc.refresh(&outcome.refresh_token).await.unwrap();
        assert!(secrets.records()[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn refresh_rejects_unrecorded_and_garbage_tokens() {
        let (svc, _) = service();
        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        // Validly signed but never persisted.
        let stray = svc.codec().issue_refresh(user.id).unwrap();
        assert!(matches!(
            svc.refresh(&stray).await,
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(
            svc.refresh("not-a-token").await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_access_token() {
        let (svc, _) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        assert!(matches!(
            svc.refresh(&outcome.access_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn refresh_rejects_expired_record() {
        let (svc, secrets) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        assert!(secrets.set_expiry(&outcome.refresh_token, Utc::now() - Duration::seconds(1)));
        assert!(matches!(
            svc.refresh(&outcome.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let (svc, _) = service();
        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();

        assert_eq!(svc.logout(user.id).await.unwrap(), 1);
        assert_eq!(svc.logout(user.id).await.unwrap(), 0);
        assert!(matches!(
            svc.refresh(&outcome.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn access_token_outlives_logout() {
        let (svc, _) = service();
        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let outcome = svc.login("a@x.com", "longpassword123").await.unwrap();
        svc.logout(user.id).await.unwrap();
        assert_eq!(svc.codec().verify(&outcome.access_token).unwrap().uid, user.id);
    }

    #[tokio::test]
    async fn current_user_lookup() {
        let (svc, _) = service();
        let user = svc
            .register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        assert_eq!(svc.current_user(user.id).await.unwrap(), user);
        assert!(matches!(
            svc.current_user(user.id + 100).await,
            Err(AuthError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_records() {
        let (svc, secrets) = service();
        svc.register(input("a@x.com", "longpassword123"))
            .await
            .unwrap();
        let stale = svc.login("a@x.com", "longpassword123").await.unwrap();
        svc.login("a@x.com", "longpassword123").await.unwrap();
        secrets.set_expiry(&stale.refresh_token, Utc::now() - Duration::seconds(1));

        assert_eq!(svc.sweep_expired().await.unwrap(), 1);
        assert_eq!(secrets.records().len(), 1);
    }
}
