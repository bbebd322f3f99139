//! JSON error responses.
//!
//! Every failure leaves the server as `{"error": "<code>", "message": "<text>"}`
//! with the status implied by its [`ErrorKind`]. Messages come from
//! `AuthError::client_message`, so internal details never reach clients.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use phone_auth::{AuthError, ErrorKind};
use serde::Serialize;

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Handler error
#[derive(Debug)]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Missing or rejected bearer credentials
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Invalid credentials")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.kind.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "Internal error while handling request");
        }
        Self::new(kind, err.client_message())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorKind::Validation, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.kind.code(),
            message: self.message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_mapping() {
        let err = ApiError::from(AuthError::PhoneTaken);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind().code(), "conflict");

        let err = ApiError::from(AuthError::OtpExpired);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind().code(), "invalid_otp");
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = ApiError::from(AuthError::TaskFailed("worker panicked at foo.rs".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn test_unauthorized() {
        let err = ApiError::unauthorized();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind().code(), "unauthorized");
    }
}
