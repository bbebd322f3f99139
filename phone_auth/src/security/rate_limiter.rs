//! Per-key rate limiting over a rolling time window.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use super::errors::RateLimiterResult;

/// Bounds how often an operation may run per key
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` and report whether it is within `limit`
    /// attempts per `window`
    ///
    /// Check and increment happen atomically per key: concurrent callers can
    /// never all observe "under limit" and together exceed it.
    async fn allow(&self, key: &str, limit: u32, window: Duration) -> bool;

    /// Attempts left for `key` in the current window, without recording one
    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> u32;

    /// Forget all attempts recorded for `key`
    async fn reset(&self, key: &str) -> RateLimiterResult<()>;

    /// Drop bookkeeping for windows that have fully elapsed
    async fn prune(&self) -> usize {
        0
    }
}

/// One limit: `limit` attempts per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Limits applied by the auth flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// OTP sends per phone
    pub send_otp_per_phone: RateLimitRule,
    /// OTP sends per client IP
    pub send_otp_per_ip: RateLimitRule,
    /// OTP verification attempts per phone
    pub verify_otp_per_phone: RateLimitRule,
    /// Login attempts per phone
    pub login_per_phone: RateLimitRule,
    /// Login attempts per client IP
    pub login_per_ip: RateLimitRule,
    /// Registrations per client IP
    pub register_per_ip: RateLimitRule,
    /// Token refreshes per client IP
    pub refresh_per_ip: RateLimitRule,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            send_otp_per_phone: RateLimitRule::new(3, 600),
            send_otp_per_ip: RateLimitRule::new(20, 3600),
            verify_otp_per_phone: RateLimitRule::new(5, 600),
            login_per_phone: RateLimitRule::new(5, 900),
            login_per_ip: RateLimitRule::new(30, 900),
            register_per_ip: RateLimitRule::new(10, 3600),
            refresh_per_ip: RateLimitRule::new(60, 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FixedWindow {
    count: u32,
    reset_at: Instant,
}

/// In-process fixed-window rate limiter
///
/// A single mutex guards every bucket, so check-then-increment is atomic.
/// Uses tokio's clock, which lets tests drive window rollover with paused
/// time.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<String, FixedWindow>>,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        if limit == 0 {
            return false;
        }

        let now = Instant::now();
        let window = window.max(Duration::from_millis(1));
        let mut windows = self.windows.lock().await;

        let bucket = windows.entry(key.to_string()).or_insert(FixedWindow {
            count: 0,
            reset_at: now + window,
        });

        if now > bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window;
        }

        bucket.count = bucket.count.saturating_add(1);
        bucket.count <= limit
    }

    async fn remaining(&self, key: &str, limit: u32, _window: Duration) -> u32 {
        let now = Instant::now();
        match self.windows.lock().await.get(key) {
            Some(bucket) if now <= bucket.reset_at => limit.saturating_sub(bucket.count),
            _ => limit,
        }
    }

    async fn reset(&self, key: &str) -> RateLimiterResult<()> {
        self.windows.lock().await.remove(key);
        Ok(())
    }

    async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, bucket| now <= bucket.reset_at);
        before - windows.len()
    }
}

/// Evict, count, and conditionally record in one atomic step.
///
/// KEYS[1] = bucket key
/// ARGV = now (ms), window (ms), limit, unique member
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('PEXPIRE', key, window)
    return 1
end
return 0
"#;

/// Redis-backed sliding-window rate limiter
///
/// Fails open: if Redis cannot be reached the request is allowed and a
/// warning is logged, so a cache outage never locks users out of
/// authentication.
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    conn: ConnectionManager,
    script: Script,
    key_prefix: String,
}

impl SlidingWindowRateLimiter {
    /// Wrap an existing connection manager
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
            key_prefix: "rate_limit:".to_string(),
        }
    }

    /// Connect to Redis at `url`
    ///
    /// # Errors
    ///
    /// * `RateLimitError::Redis` - URL invalid or server unreachable
    pub async fn connect(url: &str) -> RateLimiterResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn window_millis(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn allow(&self, key: &str, limit: u32, window: Duration) -> bool {
        if limit == 0 {
            return false;
        }

        let now = Utc::now().timestamp_millis();
        let member = format!("{now}-{}", Uuid::new_v4());
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<i64> = self
            .script
            .key(self.bucket_key(key))
            .arg(now)
            .arg(window_millis(window))
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(allowed) => {
                if allowed == 0 {
                    debug!("Rate limit reached for {key}");
                }
                allowed == 1
            }
            Err(e) => {
                warn!("Rate limiter store unavailable, allowing request for {key}: {e}");
                true
            }
        }
    }

    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> u32 {
        let cutoff = Utc::now().timestamp_millis() - window_millis(window);
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<(u32,)> = redis::pipe()
            .atomic()
            .zrembyscore(self.bucket_key(key), "-inf", cutoff)
            .ignore()
            .zcard(self.bucket_key(key))
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count,)) => limit.saturating_sub(count),
            Err(e) => {
                warn!("Rate limiter store unavailable while reading {key}: {e}");
                limit
            }
        }
    }

    async fn reset(&self, key: &str) -> RateLimiterResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.bucket_key(key)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_allows_exactly_limit() {
        let limiter = FixedWindowRateLimiter::new();

        for i in 0..5 {
            assert!(
                limiter.allow("login:phone:+1", 5, WINDOW).await,
                "Attempt {} should be allowed",
                i + 1
            );
        }
        assert!(!limiter.allow("login:phone:+1", 5, WINDOW).await);
        assert_eq!(limiter.remaining("login:phone:+1", 5, WINDOW).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_allows_again() {
        let limiter = FixedWindowRateLimiter::new();

        for _ in 0..3 {
            limiter.allow("k", 3, WINDOW).await;
        }
        assert!(!limiter.allow("k", 3, WINDOW).await);

        limiter.reset("k").await.unwrap();
        assert!(limiter.allow("k", 3, WINDOW).await);
        assert_eq!(limiter.remaining("k", 3, WINDOW).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover_allows_again() {
        let limiter = FixedWindowRateLimiter::new();

        assert!(limiter.allow("k", 2, WINDOW).await);
        assert!(limiter.allow("k", 2, WINDOW).await);
        assert!(!limiter.allow("k", 2, WINDOW).await);

        tokio::time::advance(WINDOW + Duration::from_millis(1)).await;

        assert_eq!(limiter.remaining("k", 2, WINDOW).await, 2);
        assert!(limiter.allow("k", 2, WINDOW).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new();

        assert!(limiter.allow("user1", 1, WINDOW).await);
        assert!(!limiter.allow("user1", 1, WINDOW).await);
        assert!(limiter.allow("user2", 1, WINDOW).await);
    }

    #[tokio::test]
    async fn test_zero_limit_denies() {
        let limiter = FixedWindowRateLimiter::new();
        assert!(!limiter.allow("k", 0, WINDOW).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_elapsed_windows() {
        let limiter = FixedWindowRateLimiter::new();
        limiter.allow("short", 5, Duration::from_secs(1)).await;
        limiter.allow("long", 5, Duration::from_secs(3600)).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(limiter.prune().await, 1);
        assert_eq!(limiter.remaining("long", 5, WINDOW).await, 4);
    }

    #[tokio::test]
    async fn test_concurrent_requests_no_race_condition() {
        let limiter = Arc::new(FixedWindowRateLimiter::new());
        let mut join_set = JoinSet::new();

        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            join_set.spawn(async move { limiter.allow("concurrent", 5, WINDOW).await });
        }

        let mut allowed = 0;
        while let Some(result) = join_set.join_next().await {
            if result.unwrap() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5, "Expected exactly 5 allowed requests");
    }

    async fn redis_limiter() -> SlidingWindowRateLimiter {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        SlidingWindowRateLimiter::connect(&url)
            .await
            .expect("Failed to connect to test Redis")
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_sliding_window_allows_exactly_limit() {
        let limiter = redis_limiter().await;
        let key = format!("test:{}", Uuid::new_v4());

        for _ in 0..4 {
            assert!(limiter.allow(&key, 4, WINDOW).await);
        }
        assert!(!limiter.allow(&key, 4, WINDOW).await);
        assert_eq!(limiter.remaining(&key, 4, WINDOW).await, 0);

        limiter.reset(&key).await.unwrap();
        assert!(limiter.allow(&key, 4, WINDOW).await);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_sliding_window_expires_old_entries() {
        let limiter = redis_limiter().await;
        let key = format!("test:{}", Uuid::new_v4());
        let window = Duration::from_millis(300);

        assert!(limiter.allow(&key, 1, window).await);
        assert!(!limiter.allow(&key, 1, window).await);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(limiter.allow(&key, 1, window).await);
    }
}
