//! Authentication data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::errors::AuthError;
use crate::otp::OtpPurpose;

/// User ID type
pub type UserId = i64;

/// Session ID type, also carried as the JWT `jti`
pub type SessionId = Uuid;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Vendor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Vendor => "vendor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "vendor" => Ok(Role::Vendor),
            other => Err(AuthError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub is_phone_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Identity used when issuing tokens for this user
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.id,
            phone: self.phone.clone(),
            role: self.role,
        }
    }
}

/// Fields required to insert a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub phone: String,
    pub password_hash: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub is_phone_verified: bool,
}

/// Who a token pair is issued to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub phone: String,
    pub role: Role,
}

/// Request metadata recorded on the session
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

/// Session model
///
/// Backs exactly one refresh token. Only the SHA-256 digest of that token is
/// kept.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub refresh_token_hash: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A session is live iff it is not revoked and not yet expired
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

/// Fields required to insert a session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub refresh_token_hash: String,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Verified claims of an access token, bound to a live session.
///
/// Produced by token verification and handed straight to the caller; never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: UserId,
    pub phone: String,
    pub role: Role,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

/// Access/refresh token pair returned by issue and rotate
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    /// Access token lifetime in seconds
    pub access_expires_in: i64,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub session_id: SessionId,
}

/// OTP send request
#[derive(Debug, Clone)]
pub struct SendOtpRequest {
    pub phone: String,
    pub purpose: OtpPurpose,
    pub channel: Option<String>,
}

/// Outcome of a successful OTP send
#[derive(Debug, Clone, Copy)]
pub struct OtpDispatch {
    pub expires_at: DateTime<Utc>,
    /// Code lifetime in seconds
    pub expires_in_secs: i64,
}

/// OTP verification request
#[derive(Debug, Clone)]
pub struct VerifyOtpRequest {
    pub phone: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

/// User registration request
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub phone: String,
    pub password: String,
    pub role: Role,
    pub display_name: Option<String>,
    pub auto_login: bool,
}

/// User login request
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

/// Result of a successful registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub user: User,
    /// Present when the caller asked to be logged in immediately
    pub tokens: Option<IssuedTokens>,
}
