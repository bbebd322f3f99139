//! Security module providing abuse rate limiting.
//!
//! Two interchangeable [`RateLimiter`] implementations are provided:
//!
//! - [`FixedWindowRateLimiter`]: per-key counter and reset instant, held in
//!   process memory behind a mutex. Cheap, but allows a burst of up to twice
//!   the limit across a window edge.
//! - [`SlidingWindowRateLimiter`]: per-key sorted set of request timestamps
//!   in Redis, updated by a single atomic script. Shared between server
//!   instances; fails open when Redis is unreachable.
//!
//! Per-flow limits live in [`RateLimitPolicy`].
//!
//! ## Example
//!
//! ```
//! use phone_auth::security::{FixedWindowRateLimiter, RateLimiter};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = FixedWindowRateLimiter::new();
//! let key = "send_otp:phone:+989123456789";
//!
//! for _ in 0..3 {
//!     assert!(limiter.allow(key, 3, Duration::from_secs(600)).await);
//! }
//! assert!(!limiter.allow(key, 3, Duration::from_secs(600)).await);
//! # }
//! ```

pub mod errors;
pub mod rate_limiter;

pub use errors::{RateLimitError, RateLimiterResult};
pub use rate_limiter::{
    FixedWindowRateLimiter, RateLimitPolicy, RateLimitRule, RateLimiter, SlidingWindowRateLimiter,
};
