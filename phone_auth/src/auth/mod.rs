//! Authentication module providing phone verification, registration, login,
//! and session management.
//!
//! This module implements:
//! - bcrypt or Argon2id password hashing, chosen by configuration
//! - HS256 JWT access tokens (15-minute expiry)
//! - Rotating refresh tokens (30-day expiry), one stored session each
//! - Per-phone and per-IP rate limiting on every flow
//!
//! ## Example
//!
//! ```
//! use phone_auth::auth::{
//!     AuthBackends, AuthConfig, AuthManager, JwtConfig, SendOtpRequest, password::BcryptHasher,
//! };
//! use phone_auth::{ClientInfo, otp::{LogTransport, OtpPurpose}};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::default();
//! let backends = AuthBackends::in_memory(
//!     &JwtConfig::new("a_development_secret_of_at_least_32_chars"),
//!     Arc::new(BcryptHasher::new(4)?),
//!     Arc::new(LogTransport),
//!     &config.otp,
//! )?;
//! let auth = AuthManager::new(backends, config);
//!
//! let request = SendOtpRequest {
//!     phone: "+989123456789".to_string(),
//!     purpose: OtpPurpose::PhoneVerify,
//!     channel: None,
//! };
//! let dispatch = auth.send_otp(request, &ClientInfo::default()).await?;
//! assert_eq!(dispatch.expires_in_secs, 300);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod jwt;
pub mod manager;
pub mod models;
pub mod password;
pub mod tokens;
pub mod validation;

pub use errors::{AuthError, AuthResult, ErrorKind};
pub use jwt::{JwtCodec, JwtConfig};
pub use manager::{AuthBackends, AuthConfig, AuthManager, SweepReport};
pub use models::{
    ClientInfo, Identity, IssuedTokens, LoginRequest, OtpDispatch, RegisterRequest, Registration,
    Role, SendOtpRequest, Session, SessionId, TokenClaims, User, UserId, VerifyOtpRequest,
};
pub use password::{PasswordAlgorithm, PasswordHasher, build_hasher};
pub use tokens::TokenService;
