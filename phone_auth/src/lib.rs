//! # Phone Auth
//!
//! Phone-number authentication core: one-time codes over a pluggable
//! transport, password hashing, signed access and refresh tokens, rotating
//! sessions with revocation, and abuse rate limiting.
//!
//! ## Architecture
//!
//! Components, leaves first:
//!
//! - **PasswordHasher**: bcrypt or Argon2id hashing and verification
//! - **RateLimiter**: per-key attempt budgets, in-process or Redis-backed
//! - **OtpLedger**: issue, store, and consume one-time codes
//! - **JwtCodec**: sign and verify access and refresh tokens
//! - **SessionStore**: durable sessions; the authority on revocation
//! - **TokenService**: issue, validate, rotate, and revoke token pairs
//! - **AuthManager**: the send-otp, verify-otp, register, login, refresh,
//!   and logout flows
//!
//! Every store is a trait with a PostgreSQL (or Redis) implementation and an
//! in-memory one, injected into [`AuthManager`] as `Arc<dyn Trait>`.
//!
//! ## Core Modules
//!
//! - [`auth`]: Flows, tokens, hashing, and models
//! - [`db`]: Connection pool and user/session stores
//! - [`otp`]: One-time code ledger and delivery
//! - [`security`]: Rate limiting

/// Authentication flows, tokens, and password hashing.
pub mod auth;
pub use auth::{
    AuthBackends, AuthConfig, AuthError, AuthManager, AuthResult, ClientInfo, ErrorKind,
    TokenClaims,
};

/// Connection pool and persistent stores.
pub mod db;

/// One-time codes.
pub mod otp;

/// Abuse rate limiting.
pub mod security;

/// Deadlines for auth operations.
pub mod timeouts;
