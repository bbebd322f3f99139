//! Error types for security module

use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimiterResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
///
/// Only administrative calls (`reset`, connecting) surface these. `allow`
/// never fails: an unreachable backing store lets the request through.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}
