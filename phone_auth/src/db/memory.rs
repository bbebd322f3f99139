//! In-memory repositories for tests and single-process development runs.

use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicI64, Ordering},
};
use tokio::sync::RwLock;

use super::repository::{SessionStore, UserRepository};
use crate::auth::{
    AuthError, AuthResult,
    models::{NewSession, NewUser, Role, Session, SessionId, User, UserId},
};

/// `UserRepository` backed by a map
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
    next_id: AtomicI64,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Flip a user's active flag
    pub async fn set_active(&self, user_id: UserId, active: bool) -> AuthResult<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
        user.is_active = active;
        Ok(())
    }

    /// Change a user's role
    pub async fn set_role(&self, user_id: UserId, role: Role) -> AuthResult<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
        user.role = role;
        Ok(())
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create_user(&self, user: NewUser) -> AuthResult<User> {
        // Uniqueness check and insert under one write lock
        let mut users = self.users.write().await;
        if users.values().any(|u| u.phone == user.phone) {
            return Err(AuthError::PhoneTaken);
        }

        let created = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            phone: user.phone,
            password_hash: user.password_hash,
            role: user.role,
            display_name: user.display_name,
            is_phone_verified: user.is_phone_verified,
            is_active: true,
            created_at: Utc::now(),
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.phone == phone).cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

/// `SessionStore` backed by a map
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, revoked ones included
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: NewSession) -> AuthResult<Session> {
        let now = Utc::now();
        let created = Session {
            id: session.id,
            user_id: session.user_id,
            refresh_token_hash: session.refresh_token_hash,
            user_agent: session.user_agent,
            ip: session.ip,
            created_at: now,
            last_used_at: now,
            expires_at: session.expires_at,
            revoked_at: None,
        };
        self.sessions
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_session(&self, session_id: SessionId) -> AuthResult<Session> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .filter(|s| s.revoked_at.is_none())
            .cloned()
            .ok_or(AuthError::SessionNotFound)
    }

    async fn touch_session(&self, session_id: SessionId) -> AuthResult<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id)
            && session.revoked_at.is_none()
        {
            session.last_used_at = Utc::now();
        }
        Ok(())
    }

    async fn revoke_session(&self, session_id: SessionId) -> AuthResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_user_sessions(&self, user_id: UserId) -> AuthResult<u64> {
        let now = Utc::now();
        let mut revoked = 0;
        for session in self.sessions.write().await.values_mut() {
            if session.user_id == user_id && session.revoked_at.is_none() {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn cleanup_expired_sessions(&self) -> AuthResult<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at >= now);
        Ok((before - sessions.len()) as u64)
    }
}
