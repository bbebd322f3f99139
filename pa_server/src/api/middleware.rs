//! Bearer authentication middleware for protected endpoints.
//!
//! The middleware validates the `Authorization: Bearer <token>` access token
//! (signature, expiry, type, and a live session) and inserts the verified
//! [`TokenClaims`] into request extensions for downstream handlers.
//!
//! # Extracting the identity
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use phone_auth::TokenClaims;
//!
//! async fn protected_handler(Extension(claims): Extension<TokenClaims>) -> String {
//!     format!("Authenticated as user {}", claims.user_id)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use super::{AppState, error::ApiError};

/// Pull the bearer token out of the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authentication middleware that validates access tokens and injects claims.
///
/// - **Success**: Injects `TokenClaims` into request extensions, calls next handler
/// - **Missing or malformed header**: `401 Unauthorized`
/// - **Invalid, expired, or revoked token**: `401 Unauthorized`
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or_else(ApiError::unauthorized)?;

    let claims = state
        .auth_manager
        .validate_access(token)
        .await
        .map_err(|e| {
            tracing::debug!(error = %e, "Access token rejected");
            ApiError::from(e)
        })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
