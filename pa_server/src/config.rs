//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use chrono::Duration as ChronoDuration;
use phone_auth::{
    auth::{
        AuthConfig, JwtConfig, PasswordAlgorithm,
        password::{Argon2Params, BCRYPT_DEFAULT_COST, BCRYPT_MAX_COST, BCRYPT_MIN_COST},
    },
    db::DatabaseConfig,
    otp::{MAX_OTP_DIGITS, MIN_OTP_DIGITS, OtpPolicy},
    security::{RateLimitPolicy, RateLimitRule},
};
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

/// Minimum accepted JWT secret length
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Values given on the command line, which win over the environment
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<SocketAddr>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub in_memory: bool,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis URL for the shared rate limiter; in-process limiter when absent
    pub redis_url: Option<String>,
    /// Use in-memory stores instead of PostgreSQL
    pub in_memory: bool,
    /// Token signing configuration
    pub jwt: JwtConfig,
    /// Password hashing algorithm
    pub password: PasswordAlgorithm,
    /// Flow tunables handed to the auth manager
    pub auth: AuthConfig,
    /// Period of the expired session/OTP sweep
    pub cleanup_interval: Duration,
    /// Prometheus exporter address; metrics disabled when absent
    pub metrics_bind: Option<SocketAddr>,
    /// Log output format
    pub log_format: LogFormat,
    /// Reverse proxies whose `X-Forwarded-For` header is believed
    pub trusted_proxies: Vec<IpAddr>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or any value is invalid
    pub fn from_env(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(overrides, |key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(overrides: CliOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let bind = match overrides.bind {
            Some(bind) => bind,
            None => env.parse_or("SERVER_BIND", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
        };

        // Database configuration
        let database_url = overrides
            .database_url
            .or_else(|| env.get("DATABASE_URL"))
            .unwrap_or_else(|| DatabaseConfig::development().database_url);

        let database = DatabaseConfig {
            database_url,
            max_connections: env.parse_or("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env.parse_or("DB_MIN_CONNECTIONS", 2)?,
            connection_timeout_secs: env.parse_or("DB_CONNECTION_TIMEOUT_SECS", 5)?,
            idle_timeout_secs: env.parse_or("DB_IDLE_TIMEOUT_SECS", 600)?,
            max_lifetime_secs: env.parse_or("DB_MAX_LIFETIME_SECS", 1800)?,
        };

        let redis_url = overrides.redis_url.or_else(|| env.get("REDIS_URL"));

        // Token configuration (secret REQUIRED)
        let secret = env.get("JWT_SECRET").ok_or_else(|| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let defaults = JwtConfig::new(String::new());
        let jwt = JwtConfig {
            secret,
            issuer: env.get("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: env.get("JWT_AUDIENCE").unwrap_or(defaults.audience),
            key_id: env.get("JWT_KEY_ID").unwrap_or(defaults.key_id),
            access_ttl: ChronoDuration::seconds(
                env.parse_or("ACCESS_TOKEN_TTL_SECS", defaults.access_ttl.num_seconds())?,
            ),
            refresh_ttl: ChronoDuration::seconds(
                env.parse_or("REFRESH_TOKEN_TTL_SECS", defaults.refresh_ttl.num_seconds())?,
            ),
        };

        let password = match env.get("PASSWORD_ALGORITHM").as_deref() {
            None | Some("argon2id") => {
                let defaults = Argon2Params::default();
                PasswordAlgorithm::Argon2id(Argon2Params {
                    memory_kib: env.parse_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
                    iterations: env.parse_or("ARGON2_ITERATIONS", defaults.iterations)?,
                    parallelism: env.parse_or("ARGON2_PARALLELISM", defaults.parallelism)?,
                    salt_len: env.parse_or("ARGON2_SALT_LEN", defaults.salt_len)?,
                    key_len: env.parse_or("ARGON2_KEY_LEN", defaults.key_len)?,
                })
            }
            Some("bcrypt") => PasswordAlgorithm::Bcrypt {
                cost: env.parse_or("BCRYPT_COST", BCRYPT_DEFAULT_COST)?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "PASSWORD_ALGORITHM".to_string(),
                    reason: format!("Unknown algorithm '{other}' (expected argon2id or bcrypt)"),
                });
            }
        };

        let otp_defaults = OtpPolicy::default();
        let otp = OtpPolicy {
            digits: env.parse_or("OTP_DIGITS", otp_defaults.digits)?,
            ttl: ChronoDuration::seconds(
                env.parse_or("OTP_TTL_SECS", otp_defaults.ttl.num_seconds())?,
            ),
            max_attempts: env.parse_or("OTP_MAX_ATTEMPTS", otp_defaults.max_attempts)?,
        };

        let limits = RateLimitPolicy::default();
        let rate_limits = RateLimitPolicy {
            send_otp_per_phone: env.rule("SEND_OTP_PHONE", limits.send_otp_per_phone)?,
            send_otp_per_ip: env.rule("SEND_OTP_IP", limits.send_otp_per_ip)?,
            verify_otp_per_phone: env.rule("VERIFY_OTP_PHONE", limits.verify_otp_per_phone)?,
            login_per_phone: env.rule("LOGIN_PHONE", limits.login_per_phone)?,
            login_per_ip: env.rule("LOGIN_IP", limits.login_per_ip)?,
            register_per_ip: env.rule("REGISTER_IP", limits.register_per_ip)?,
            refresh_per_ip: env.rule("REFRESH_IP", limits.refresh_per_ip)?,
        };

        let operation_timeout = env
            .parse_opt::<u64>("OPERATION_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let metrics_bind = env.parse_opt("METRICS_BIND")?;

        let log_format = match env.get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "LOG_FORMAT".to_string(),
                    reason: format!("Unknown format '{other}' (expected json or pretty)"),
                });
            }
        };

        let trusted_proxies = env.ip_list("TRUSTED_PROXIES")?;

        let config = ServerConfig {
            bind,
            database,
            redis_url,
            in_memory: overrides.in_memory,
            jwt,
            password,
            auth: AuthConfig {
                otp,
                rate_limits,
                operation_timeout,
            },
            cleanup_interval: Duration::from_secs(
                env.parse_or("SESSION_CLEANUP_INTERVAL_SECS", 3600)?,
            ),
            metrics_bind,
            log_format,
            trusted_proxies,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: format!(
                    "Must be at least {MIN_JWT_SECRET_LEN} characters (128-bit security)"
                ),
            });
        }

        if self.jwt.access_ttl.num_seconds() <= 0 {
            return Err(ConfigError::positive("ACCESS_TOKEN_TTL_SECS"));
        }
        if self.jwt.refresh_ttl <= self.jwt.access_ttl {
            return Err(ConfigError::Invalid {
                var: "REFRESH_TOKEN_TTL_SECS".to_string(),
                reason: "Must be longer than the access token lifetime".to_string(),
            });
        }

        if let PasswordAlgorithm::Bcrypt { cost } = self.password
            && !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&cost)
        {
            return Err(ConfigError::Invalid {
                var: "BCRYPT_COST".to_string(),
                reason: format!("Must be between {BCRYPT_MIN_COST} and {BCRYPT_MAX_COST}"),
            });
        }

        let otp = &self.auth.otp;
        if !(MIN_OTP_DIGITS..=MAX_OTP_DIGITS).contains(&otp.digits) {
            return Err(ConfigError::Invalid {
                var: "OTP_DIGITS".to_string(),
                reason: format!("Must be between {MIN_OTP_DIGITS} and {MAX_OTP_DIGITS}"),
            });
        }
        if otp.ttl.num_seconds() <= 0 {
            return Err(ConfigError::positive("OTP_TTL_SECS"));
        }
        if otp.max_attempts == 0 {
            return Err(ConfigError::positive("OTP_MAX_ATTEMPTS"));
        }

        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::positive("SESSION_CLEANUP_INTERVAL_SECS"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    self.database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

impl ConfigError {
    fn positive(var: &str) -> Self {
        ConfigError::Invalid {
            var: var.to_string(),
            reason: "Must be greater than 0".to_string(),
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse_opt<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: key.to_string(),
                    reason: format!("Cannot parse '{raw}'"),
                })
            })
            .transpose()
    }

    /// Parse `key` if set, otherwise fall back to `default`
    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }

    /// Comma-separated IP addresses; empty when unset
    fn ip_list(&self, key: &str) -> Result<Vec<IpAddr>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| {
                item.parse().map_err(|_| ConfigError::Invalid {
                    var: key.to_string(),
                    reason: format!("'{item}' is not an IP address"),
                })
            })
            .collect()
    }

    /// `RATE_LIMIT_<FLOW>_ATTEMPTS` / `RATE_LIMIT_<FLOW>_WINDOW_SECS`
    fn rule(&self, flow: &str, default: RateLimitRule) -> Result<RateLimitRule, ConfigError> {
        let window_key = format!("RATE_LIMIT_{flow}_WINDOW_SECS");
        let window_secs = self.parse_or(&window_key, default.window.as_secs())?;
        if window_secs == 0 {
            return Err(ConfigError::positive(&window_key));
        }

        Ok(RateLimitRule::new(
            self.parse_or(&format!("RATE_LIMIT_{flow}_ATTEMPTS"), default.limit)?,
            window_secs,
        ))
    }
}
