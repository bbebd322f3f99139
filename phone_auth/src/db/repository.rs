//! Repository trait definitions for testability and dependency injection.
//!
//! This module provides trait-based abstractions over the user and session
//! tables, with PostgreSQL implementations. In-memory implementations for
//! tests and development live in [`super::memory`].

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;

use crate::auth::{
    AuthError, AuthResult,
    models::{NewSession, NewUser, Role, Session, SessionId, User, UserId},
};

/// Trait for user repository operations
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    ///
    /// Fails with `AuthError::PhoneTaken` if the phone is already registered.
    async fn create_user(&self, user: NewUser) -> AuthResult<User>;

    /// Find user by phone number
    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>>;

    /// Find user by ID
    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>>;
}

/// Trait for refresh-token session storage
///
/// The store is the single authority on revocation. A revoked session is
/// never handed back by [`SessionStore::get_session`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new active session
    async fn create_session(&self, session: NewSession) -> AuthResult<Session>;

    /// Fetch a session that has not been revoked
    ///
    /// Fails with `AuthError::SessionNotFound` if it is absent or revoked.
    async fn get_session(&self, session_id: SessionId) -> AuthResult<Session>;

    /// Bump `last_used_at` on a non-revoked session
    async fn touch_session(&self, session_id: SessionId) -> AuthResult<()>;

    /// Revoke one session
    ///
    /// Idempotent. Returns `true` only for the call that moved the session
    /// from active to revoked.
    async fn revoke_session(&self, session_id: SessionId) -> AuthResult<bool>;

    /// Revoke every session of a user, returning how many were revoked
    async fn revoke_user_sessions(&self, user_id: UserId) -> AuthResult<u64>;

    /// Delete sessions past their expiry, returning how many were deleted
    async fn cleanup_expired_sessions(&self) -> AuthResult<u64>;
}

fn decode_role(row: &PgRow) -> AuthResult<Role> {
    let raw: String = row.try_get("role")?;
    raw.parse::<Role>().map_err(|e| {
        AuthError::Database(sqlx::Error::ColumnDecode {
            index: "role".to_string(),
            source: Box::new(e),
        })
    })
}

fn user_from_row(row: &PgRow) -> AuthResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
        role: decode_role(row)?,
        display_name: row.try_get("display_name")?,
        is_phone_verified: row.try_get("is_phone_verified")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> AuthResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        refresh_token_hash: row.try_get("refresh_token_hash")?,
        user_agent: row.try_get("user_agent")?,
        ip: row.try_get("ip")?,
        created_at: row.try_get("created_at")?,
        last_used_at: row.try_get("last_used_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

const USER_COLUMNS: &str = "id, phone, password_hash, role, display_name, is_phone_verified, \
                            is_active, created_at";

const SESSION_COLUMNS: &str = "id, user_id, refresh_token_hash, user_agent, ip, created_at, \
                               last_used_at, expires_at, revoked_at";

/// PostgreSQL implementation of `UserRepository`
pub struct PgUserRepository {
    pool: Arc<PgPool>,
}

impl PgUserRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create_user(&self, user: NewUser) -> AuthResult<User> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO users (phone, password_hash, role, display_name, is_phone_verified)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.display_name)
        .bind(user.is_phone_verified)
        .fetch_one(self.pool.as_ref())
        .await;

        match result {
            Ok(row) => user_from_row(&row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AuthError::PhoneTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_phone(&self, phone: &str) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE phone = $1"))
            .bind(phone)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }
}

/// PostgreSQL implementation of `SessionStore`
///
/// Every mutation is a single-row statement; no transaction is held open.
pub struct PgSessionStore {
    pool: Arc<PgPool>,
}

impl PgSessionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, session: NewSession) -> AuthResult<Session> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO sessions (id, user_id, refresh_token_hash, user_agent, ip, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.user_agent)
        .bind(&session.ip)
        .bind(session.expires_at)
        .fetch_one(self.pool.as_ref())
        .await?;

        session_from_row(&row)
    }

    async fn get_session(&self, session_id: SessionId) -> AuthResult<Session> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND revoked_at IS NULL"
        ))
        .bind(session_id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(AuthError::SessionNotFound)?;

        session_from_row(&row)
    }

    async fn touch_session(&self, session_id: SessionId) -> AuthResult<()> {
        sqlx::query(
            "UPDATE sessions SET last_used_at = NOW() WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn revoke_session(&self, session_id: SessionId) -> AuthResult<bool> {
        let result =
            sqlx::query("UPDATE sessions SET revoked_at = NOW() WHERE id = $1 AND revoked_at IS NULL")
                .bind(session_id)
                .execute(self.pool.as_ref())
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_user_sessions(&self, user_id: UserId) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_expired_sessions(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
