//! Token issuance, validation, rotation, and revocation.
//!
//! [`TokenService`] is the only component that talks to both the JWT codec
//! and the session store. Every refresh token is backed by exactly one
//! session row; rotating it revokes that row before a new one is created,
//! so a refresh token can be exchanged at most once.

use chrono::{Duration, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{
    errors::{AuthError, AuthResult},
    jwt::{JwtCodec, JwtConfig},
    models::{ClientInfo, Identity, IssuedTokens, NewSession, SessionId, TokenClaims, UserId},
};
use crate::db::SessionStore;

/// SHA-256 hex digest of a refresh token, as stored on the session
pub fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn digests_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Issues and validates token pairs backed by stored sessions
pub struct TokenService {
    codec: JwtCodec,
    sessions: Arc<dyn SessionStore>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Create a token service
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Invalid JWT configuration
    pub fn new(config: &JwtConfig, sessions: Arc<dyn SessionStore>) -> AuthResult<Self> {
        if config.access_ttl <= Duration::zero() || config.refresh_ttl <= Duration::zero() {
            return Err(AuthError::Validation(
                "token lifetimes must be positive".to_string(),
            ));
        }

        Ok(Self {
            codec: JwtCodec::new(config)?,
            sessions,
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        })
    }

    /// Access token lifetime
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Open a new session for `identity` and sign its token pair
    ///
    /// Nothing is returned unless the session was persisted.
    pub async fn issue_tokens(
        &self,
        identity: &Identity,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let refresh_expires_at = now + self.refresh_ttl;

        let refresh_token = self.codec.sign_refresh(
            identity.user_id,
            session_id,
            identity.role,
            &identity.phone,
            refresh_expires_at,
        )?;
        let access_token = self.codec.sign_access(
            identity.user_id,
            session_id,
            identity.role,
            &identity.phone,
            now + self.access_ttl,
        )?;

        self.sessions
            .create_session(NewSession {
                id: session_id,
                user_id: identity.user_id,
                refresh_token_hash: hash_refresh_token(&refresh_token),
                user_agent: client.user_agent.clone(),
                ip: client.ip.clone(),
                expires_at: refresh_expires_at,
            })
            .await?;

        debug!("Opened session {session_id} for user {}", identity.user_id);

        Ok(IssuedTokens {
            access_token,
            access_expires_in: self.access_ttl.num_seconds(),
            refresh_token,
            refresh_expires_at,
            session_id,
        })
    }

    /// Verify an access token and require its session to still be live
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidToken` - Bad token, or its session is revoked or expired
    pub async fn validate_access(&self, token: &str) -> AuthResult<TokenClaims> {
        let claims = self.codec.verify_access(token)?;

        let session = self
            .sessions
            .get_session(claims.session_id)
            .await
            .map_err(|e| match e {
                AuthError::SessionNotFound => AuthError::InvalidToken("session revoked".to_string()),
                other => other,
            })?;

        if !session.is_live(Utc::now()) {
            return Err(AuthError::InvalidToken("session expired".to_string()));
        }
        if session.user_id != claims.user_id {
            return Err(AuthError::InvalidToken("session subject mismatch".to_string()));
        }

        self.sessions.touch_session(session.id).await?;
        Ok(claims)
    }

    /// Verify a refresh token's signature, expiry, and type
    ///
    /// Does not consult the session store.
    pub fn verify_refresh(&self, token: &str) -> AuthResult<TokenClaims> {
        self.codec.verify_refresh(token)
    }

    /// Exchange a refresh token for a new token pair issued to `identity`
    ///
    /// `identity` is the account as currently stored, so the new pair carries
    /// its present role and phone rather than those of the old token. The
    /// presented token's session is revoked before the new one is opened. A
    /// token whose session was already revoked, including by a concurrent
    /// rotation of the same token, is rejected.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidToken` - Bad token, its session is not live, or it
    ///   belongs to someone other than `identity`
    pub async fn rotate(
        &self,
        refresh_token: &str,
        identity: &Identity,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        let claims = self.codec.verify_refresh(refresh_token)?;
        if claims.user_id != identity.user_id {
            return Err(AuthError::InvalidToken("token subject mismatch".to_string()));
        }

        let session = match self.sessions.get_session(claims.session_id).await {
            Ok(session) => session,
            Err(AuthError::SessionNotFound) => {
                warn!(
                    "Refresh token reuse for revoked session {} (user {})",
                    claims.session_id, claims.user_id
                );
                return Err(AuthError::InvalidToken("session revoked".to_string()));
            }
            Err(e) => return Err(e),
        };

        if !session.is_live(Utc::now()) {
            return Err(AuthError::InvalidToken("session expired".to_string()));
        }
        if session.user_id != claims.user_id {
            return Err(AuthError::InvalidToken("session subject mismatch".to_string()));
        }
        if !digests_match(&session.refresh_token_hash, &hash_refresh_token(refresh_token)) {
            warn!("Refresh token digest mismatch for session {}", session.id);
            return Err(AuthError::InvalidToken("refresh token mismatch".to_string()));
        }

        if !self.sessions.revoke_session(session.id).await? {
            warn!("Concurrent rotation lost for session {}", session.id);
            return Err(AuthError::InvalidToken("session already rotated".to_string()));
        }

        self.issue_tokens(identity, client).await
    }

    /// Revoke one session, returning whether this call revoked it
    pub async fn revoke_session(&self, session_id: SessionId) -> AuthResult<bool> {
        self.sessions.revoke_session(session_id).await
    }

    /// Revoke every session of a user
    pub async fn revoke_all(&self, user_id: UserId) -> AuthResult<u64> {
        self.sessions.revoke_user_sessions(user_id).await
    }

    /// Delete expired sessions
    pub async fn cleanup_expired_sessions(&self) -> AuthResult<u64> {
        self.sessions.cleanup_expired_sessions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::models::{Role, Session},
        db::InMemorySessionStore,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn service() -> (TokenService, Arc<InMemorySessionStore>) {
        let store = Arc::new(InMemorySessionStore::new());
        let config = JwtConfig::new("test_secret_key_for_testing_only_0123456789");
        let service = TokenService::new(&config, store.clone()).unwrap();
        (service, store)
    }

    fn identity() -> Identity {
        Identity {
            user_id: 42,
            phone: "+989123456789".to_string(),
            role: Role::Vendor,
        }
    }

    #[test]
    fn test_refresh_digest_is_sha256_hex() {
        let digest = hash_refresh_token("token");
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, "token");
        assert_eq!(digest, hash_refresh_token("token"));
        assert!(digests_match(&digest, &hash_refresh_token("token")));
        assert!(!digests_match(&digest, &hash_refresh_token("other")));
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (service, store) = service();
        let client = ClientInfo {
            user_agent: Some("test-agent".to_string()),
            ip: Some("10.0.0.1".to_string()),
        };
        let tokens = service.issue_tokens(&identity(), &client).await.unwrap();

        assert_eq!(tokens.access_expires_in, 900);
        let claims = service.validate_access(&tokens.access_token).await.unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role, Role::Vendor);
        assert_eq!(claims.session_id, tokens.session_id);

        let session = store.get_session(tokens.session_id).await.unwrap();
        assert_ne!(session.refresh_token_hash, tokens.refresh_token);
        assert_eq!(session.ip.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let (service, _) = service();
        let tokens = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        assert!(service.validate_access(&tokens.refresh_token).await.is_err());
        assert!(
            service
                .rotate(&tokens.access_token, &identity(), &ClientInfo::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_rotation_rejects_replay() {
        let (service, _) = service();
        let original = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        let rotated = service
            .rotate(&original.refresh_token, &identity(), &ClientInfo::default())
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, original.refresh_token);
        assert_ne!(rotated.session_id, original.session_id);

        let replay = service
            .rotate(&original.refresh_token, &identity(), &ClientInfo::default())
            .await;
        assert!(matches!(replay, Err(AuthError::InvalidToken(_))));

        // Old access token died with its session; the new one works
        assert!(service.validate_access(&original.access_token).await.is_err());
        assert!(service.validate_access(&rotated.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let (service, _) = service();
        let service = Arc::new(service);
        let tokens = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = Arc::clone(&service);
            let token = tokens.refresh_token.clone();
            handles.push(tokio::spawn(async move {
                service
                    .rotate(&token, &identity(), &ClientInfo::default())
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_revocation_kills_unexpired_access_token() {
        let (service, _) = service();
        let tokens = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        assert!(service.revoke_session(tokens.session_id).await.unwrap());
        assert!(matches!(
            service.validate_access(&tokens.access_token).await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(!service.revoke_session(tokens.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (service, _) = service();
        let a = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();
        let b = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        assert_eq!(service.revoke_all(42).await.unwrap(), 2);
        assert!(service.validate_access(&a.access_token).await.is_err());
        assert!(service.validate_access(&b.access_token).await.is_err());
    }

    /// Session store whose inserts can be switched to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySessionStore,
        fail_create: AtomicBool,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn create_session(&self, session: NewSession) -> AuthResult<Session> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(AuthError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.create_session(session).await
        }

        async fn get_session(&self, session_id: SessionId) -> AuthResult<Session> {
            self.inner.get_session(session_id).await
        }

        async fn touch_session(&self, session_id: SessionId) -> AuthResult<()> {
            self.inner.touch_session(session_id).await
        }

        async fn revoke_session(&self, session_id: SessionId) -> AuthResult<bool> {
            self.inner.revoke_session(session_id).await
        }

        async fn revoke_user_sessions(&self, user_id: UserId) -> AuthResult<u64> {
            self.inner.revoke_user_sessions(user_id).await
        }

        async fn cleanup_expired_sessions(&self) -> AuthResult<u64> {
            self.inner.cleanup_expired_sessions().await
        }
    }

    fn flaky_service() -> (TokenService, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        let config = JwtConfig::new("test_secret_key_for_testing_only_0123456789");
        let service = TokenService::new(&config, store.clone()).unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn test_issue_fails_when_session_not_persisted() {
        let (service, store) = flaky_service();
        store.fail_create.store(true, Ordering::SeqCst);

        let result = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::Database(_))));
        assert!(store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_rotate_fails_when_new_session_not_persisted() {
        let (service, store) = flaky_service();
        let original = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        store.fail_create.store(true, Ordering::SeqCst);
        let result = service
            .rotate(&original.refresh_token, &identity(), &ClientInfo::default())
            .await;
        assert!(matches!(result, Err(AuthError::Database(_))));

        // The old session stays revoked and no other session exists
        assert!(matches!(
            store.get_session(original.session_id).await,
            Err(AuthError::SessionNotFound)
        ));
        assert_eq!(store.inner.len().await, 1);

        store.fail_create.store(false, Ordering::SeqCst);
        assert!(
            service
                .rotate(&original.refresh_token, &identity(), &ClientInfo::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_rotation_uses_current_identity() {
        let (service, _) = service();
        let original = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        let current = Identity {
            role: Role::User,
            ..identity()
        };
        let rotated = service
            .rotate(&original.refresh_token, &current, &ClientInfo::default())
            .await
            .unwrap();

        let claims = service.validate_access(&rotated.access_token).await.unwrap();
        assert_eq!(claims.role, Role::User);
        assert_eq!(service.verify_refresh(&rotated.refresh_token).unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_rotation_rejects_other_subject() {
        let (service, _) = service();
        let original = service
            .issue_tokens(&identity(), &ClientInfo::default())
            .await
            .unwrap();

        let stranger = Identity {
            user_id: 7,
            ..identity()
        };
        assert!(matches!(
            service
                .rotate(&original.refresh_token, &stranger, &ClientInfo::default())
                .await,
            Err(AuthError::InvalidToken(_))
        ));
        // The session was not spent by the rejected attempt
        assert!(service.validate_access(&original.access_token).await.is_ok());
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let mut config = JwtConfig::new("test_secret_key_for_testing_only_0123456789");
        config.access_ttl = Duration::zero();
        assert!(TokenService::new(&config, Arc::new(InMemorySessionStore::new())).is_err());
    }
}
