//! Authentication error types.

use std::time::Duration;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JWT encoding error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Password hashing failed
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    /// Stored password hash could not be parsed
    #[error("Malformed password hash")]
    MalformedHash,

    /// Unknown phone or wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token failed verification (signature, expiry, type, or session state)
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Session not found or already revoked
    #[error("Session not found")]
    SessionNotFound,

    /// User not found
    #[error("User not found")]
    UserNotFound,

    /// Phone number has not been verified with an OTP
    #[error("Phone number is not verified")]
    PhoneNotVerified,

    /// Account has been deactivated
    #[error("Account is disabled")]
    AccountDisabled,

    /// Phone number already registered
    #[error("Phone number already registered")]
    PhoneTaken,

    /// OTP code expired
    #[error("Verification code expired")]
    OtpExpired,

    /// OTP code missing, mismatched, or already used
    #[error("Invalid verification code")]
    OtpInvalid,

    /// Rate limited
    #[error("Too many attempts, please try again later")]
    RateLimited,

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// OTP delivery failed
    #[error("OTP delivery failed: {0}")]
    Transport(String),

    /// Operation exceeded the caller's deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Blocking worker task failed
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Client-facing error classes.
///
/// Every [`AuthError`] collapses into exactly one kind, and every kind maps to
/// one stable HTTP status and machine-readable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OtpExpired,
    OtpInvalid,
    RateLimited,
    Unauthorized,
    Forbidden,
    Conflict,
    Validation,
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::OtpExpired | ErrorKind::OtpInvalid | ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Internal => 500,
        }
    }

    /// Machine-readable error code
    ///
    /// Expired and wrong codes share `invalid_otp` on the wire.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::OtpExpired | ErrorKind::OtpInvalid => "invalid_otp",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "bad_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl AuthError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::OtpExpired => ErrorKind::OtpExpired,
            AuthError::OtpInvalid => ErrorKind::OtpInvalid,
            AuthError::RateLimited => ErrorKind::RateLimited,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken(_)
            | AuthError::SessionNotFound
            | AuthError::UserNotFound => ErrorKind::Unauthorized,
            AuthError::PhoneNotVerified | AuthError::AccountDisabled => ErrorKind::Forbidden,
            AuthError::PhoneTaken => ErrorKind::Conflict,
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Database(_)
            | AuthError::Jwt(_)
            | AuthError::Hashing(_)
            | AuthError::MalformedHash
            | AuthError::Transport(_)
            | AuthError::Timeout(_)
            | AuthError::TaskFailed(_) => ErrorKind::Internal,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Internal failures are collapsed into a generic message, and every
    /// credential or token failure reads the same so callers cannot probe
    /// which phone numbers are registered.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            ErrorKind::Unauthorized => "Invalid credentials".to_string(),
            ErrorKind::OtpExpired | ErrorKind::OtpInvalid => {
                "Invalid or expired verification code".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err = AuthError::Hashing("argon2 params out of range".to_string());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.client_message(), "Internal server error");
        assert_eq!(err.kind().status(), 500);
    }

    #[test]
    fn test_credential_failures_are_indistinguishable() {
        let unknown = AuthError::UserNotFound;
        let wrong = AuthError::InvalidCredentials;
        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(unknown.client_message(), wrong.client_message());
    }

    #[test]
    fn test_otp_errors_share_wire_code() {
        assert_eq!(AuthError::OtpExpired.kind().code(), "invalid_otp");
        assert_eq!(AuthError::OtpInvalid.kind().code(), "invalid_otp");
        assert_eq!(AuthError::OtpExpired.kind().status(), 400);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::RateLimited.kind().status(), 429);
        assert_eq!(AuthError::PhoneNotVerified.kind().status(), 403);
        assert_eq!(AuthError::PhoneTaken.kind().status(), 409);
        assert_eq!(AuthError::Validation("x".into()).kind().code(), "bad_request");
    }
}
