//! Authentication manager implementation.

use log::{debug, info, warn};
use std::{sync::Arc, time::Duration};

use super::{
    errors::{AuthError, AuthResult},
    jwt::JwtConfig,
    models::{
        ClientInfo, IssuedTokens, LoginRequest, NewUser, OtpDispatch, RegisterRequest,
        Registration, SendOtpRequest, TokenClaims, User, VerifyOtpRequest,
    },
    password::PasswordHasher,
    tokens::TokenService,
    validation::{validate_password, validate_phone},
};
use crate::{
    db::{InMemorySessionStore, InMemoryUserRepository, UserRepository},
    otp::{InMemoryOtpLedger, OtpLedger, OtpPolicy, OtpPurpose, OtpTransport, transport::mask_phone},
    security::{FixedWindowRateLimiter, RateLimitPolicy, RateLimitRule, RateLimiter},
    timeouts::with_timeout,
};

const DUMMY_PASSWORD: &str = "unknown-account-placeholder";

/// Tunables for the auth flows
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub otp: OtpPolicy,
    pub rate_limits: RateLimitPolicy,
    /// Deadline applied to every flow; unbounded when `None`
    pub operation_timeout: Option<Duration>,
}

/// Collaborators the manager composes
#[derive(Clone)]
pub struct AuthBackends {
    pub users: Arc<dyn UserRepository>,
    pub otp: Arc<dyn OtpLedger>,
    pub transport: Arc<dyn OtpTransport>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub limiter: Arc<dyn RateLimiter>,
    pub tokens: Arc<TokenService>,
}

impl AuthBackends {
    /// Process-local wiring: in-memory stores and a fixed-window limiter
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Invalid JWT configuration
    pub fn in_memory(
        jwt: &JwtConfig,
        hasher: Arc<dyn PasswordHasher>,
        transport: Arc<dyn OtpTransport>,
        otp_policy: &OtpPolicy,
    ) -> AuthResult<Self> {
        Ok(Self {
            users: Arc::new(InMemoryUserRepository::new()),
            otp: Arc::new(InMemoryOtpLedger::with_max_attempts(otp_policy.max_attempts)),
            transport,
            hasher,
            limiter: Arc::new(FixedWindowRateLimiter::new()),
            tokens: Arc::new(TokenService::new(jwt, Arc::new(InMemorySessionStore::new()))?),
        })
    }
}

/// Rows and buckets removed by one maintenance sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub otp_codes: u64,
    pub rate_limit_buckets: usize,
}

/// Authentication manager
///
/// Runs the send-otp, verify-otp, register, login, refresh, and logout
/// flows. Each flow validates its input, passes its rate-limit gates, and
/// only then touches hashing, signing, or storage.
#[derive(Clone)]
pub struct AuthManager {
    users: Arc<dyn UserRepository>,
    otp: Arc<dyn OtpLedger>,
    transport: Arc<dyn OtpTransport>,
    hasher: Arc<dyn PasswordHasher>,
    limiter: Arc<dyn RateLimiter>,
    tokens: Arc<TokenService>,
    config: AuthConfig,
    /// Verified against on unknown-phone logins so both failures cost one hash check
    dummy_hash: Option<String>,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// Hashes a throwaway password once with the configured hasher.
    pub fn new(backends: AuthBackends, config: AuthConfig) -> Self {
        let dummy_hash = backends
            .hasher
            .hash(DUMMY_PASSWORD)
            .inspect_err(|e| warn!("Failed to prepare login dummy hash: {e}"))
            .ok();
        Self {
            users: backends.users,
            otp: backends.otp,
            transport: backends.transport,
            hasher: backends.hasher,
            limiter: backends.limiter,
            tokens: backends.tokens,
            config,
            dummy_hash,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Issue and deliver a one-time code
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Phone not in E.164 form
    /// * `AuthError::RateLimited` - Too many sends for this phone or IP
    /// * `AuthError::Transport` - Delivery failed
    pub async fn send_otp(
        &self,
        request: SendOtpRequest,
        client: &ClientInfo,
    ) -> AuthResult<OtpDispatch> {
        validate_phone(&request.phone)?;

        with_timeout(self.config.operation_timeout, async {
            let limits = &self.config.rate_limits;
            self.gate(
                &format!("send_otp:phone:{}", request.phone),
                limits.send_otp_per_phone,
            )
            .await?;
            if let Some(ip) = &client.ip {
                self.gate(&format!("send_otp:ip:{ip}"), limits.send_otp_per_ip)
                    .await?;
            }

            let policy = &self.config.otp;
            let (code, expires_at) = self
                .otp
                .create_otp(&request.phone, request.purpose, policy.digits, policy.ttl)
                .await?;
            self.transport.send(&request.phone, &code).await?;

            info!(
                "Sent {} code to {} via {}",
                request.purpose,
                mask_phone(&request.phone),
                request.channel.as_deref().unwrap_or("sms")
            );

            Ok(OtpDispatch {
                expires_at,
                expires_in_secs: policy.ttl.num_seconds(),
            })
        })
        .await
    }

    /// Check a one-time code
    ///
    /// A `phone_verify` code additionally marks the phone as verified.
    ///
    /// # Errors
    ///
    /// * `AuthError::OtpExpired` / `AuthError::OtpInvalid` - Code rejected
    /// * `AuthError::RateLimited` - Too many attempts for this phone
    pub async fn verify_otp(&self, request: VerifyOtpRequest) -> AuthResult<bool> {
        validate_phone(&request.phone)?;

        with_timeout(self.config.operation_timeout, async {
            self.gate(
                &format!("verify_otp:phone:{}", request.phone),
                self.config.rate_limits.verify_otp_per_phone,
            )
            .await?;

            let verified = self
                .otp
                .verify(&request.phone, &request.code, request.purpose)
                .await
                .inspect_err(|e| {
                    warn!(
                        target: "security",
                        "OTP verification failed for {}: {e}",
                        mask_phone(&request.phone)
                    )
                })?;

            if verified && request.purpose == OtpPurpose::PhoneVerify {
                self.otp.mark_phone_verified(&request.phone).await?;
                info!("Phone {} verified", mask_phone(&request.phone));
            }

            Ok(verified)
        })
        .await
    }

    /// Register a new user on a verified phone
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Malformed phone or password out of bounds
    /// * `AuthError::PhoneNotVerified` - No successful `phone_verify` OTP yet
    /// * `AuthError::PhoneTaken` - Phone already registered
    /// * `AuthError::RateLimited` - Too many registrations from this IP
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
    ) -> AuthResult<Registration> {
        validate_phone(&request.phone)?;
        validate_password(&request.password)?;

        with_timeout(self.config.operation_timeout, async move {
            if let Some(ip) = &client.ip {
                self.gate(
                    &format!("register:ip:{ip}"),
                    self.config.rate_limits.register_per_ip,
                )
                .await?;
            }

            if !self.otp.is_phone_verified(&request.phone).await? {
                return Err(AuthError::PhoneNotVerified);
            }
            if self.users.find_by_phone(&request.phone).await?.is_some() {
                return Err(AuthError::PhoneTaken);
            }

            let password_hash = self.hash_password(request.password).await?;

            let user = self
                .users
                .create_user(NewUser {
                    phone: request.phone,
                    password_hash,
                    role: request.role,
                    display_name: request
                        .display_name
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty()),
                    is_phone_verified: true,
                })
                .await?;

            info!("Registered user {} as {}", user.id, user.role);

            let tokens = if request.auto_login {
                Some(self.tokens.issue_tokens(&user.identity(), client).await?)
            } else {
                None
            };

            Ok(Registration { user, tokens })
        })
        .await
    }

    /// Authenticate with phone and password
    ///
    /// Unknown phone and wrong password are reported identically.
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - Unknown phone or wrong password
    /// * `AuthError::AccountDisabled` / `AuthError::PhoneNotVerified` - Account may not log in
    /// * `AuthError::RateLimited` - Too many attempts for this phone or IP
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> AuthResult<(User, IssuedTokens)> {
        validate_phone(&request.phone)?;

        with_timeout(self.config.operation_timeout, async move {
            let limits = &self.config.rate_limits;
            let phone_key = format!("login:phone:{}", request.phone);
            self.gate(&phone_key, limits.login_per_phone).await?;
            if let Some(ip) = &client.ip {
                self.gate(&format!("login:ip:{ip}"), limits.login_per_ip)
                    .await?;
            }

            let Some(user) = self.users.find_by_phone(&request.phone).await? else {
                if let Some(dummy) = &self.dummy_hash {
                    let _ = self.verify_password(request.password, dummy.clone()).await;
                }
                warn!(
                    target: "security",
                    "Login failed for {}: unknown phone",
                    mask_phone(&request.phone)
                );
                return Err(AuthError::InvalidCredentials);
            };

            if !self
                .verify_password(request.password, user.password_hash.clone())
                .await?
            {
                warn!(target: "security", "Login failed for user {}: wrong password", user.id);
                return Err(AuthError::InvalidCredentials);
            }

            if !user.is_active {
                return Err(AuthError::AccountDisabled);
            }
            if !user.is_phone_verified {
                return Err(AuthError::PhoneNotVerified);
            }

            if let Err(e) = self.limiter.reset(&phone_key).await {
                warn!("Failed to reset login limiter: {e}");
            }

            let tokens = self.tokens.issue_tokens(&user.identity(), client).await?;
            info!("User {} logged in (session {})", user.id, tokens.session_id);

            Ok((user, tokens))
        })
        .await
    }

    /// Exchange a refresh token for a new pair
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidToken` - Token invalid, reused, or its owner is gone or disabled
    /// * `AuthError::RateLimited` - Too many refreshes from this IP
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<IssuedTokens> {
        with_timeout(self.config.operation_timeout, async {
            if let Some(ip) = &client.ip {
                self.gate(
                    &format!("refresh:ip:{ip}"),
                    self.config.rate_limits.refresh_per_ip,
                )
                .await?;
            }

            let claims = self.tokens.verify_refresh(refresh_token)?;
            let user = self
                .users
                .find_by_id(claims.user_id)
                .await?
                .filter(|user| user.is_active)
                .ok_or_else(|| AuthError::InvalidToken("account unavailable".to_string()))?;

            let tokens = self
                .tokens
                .rotate(refresh_token, &user.identity(), client)
                .await
                .inspect_err(|e| {
                    warn!(target: "security", "Refresh rejected for user {}: {e}", user.id)
                })?;
            debug!(
                "Rotated session {} -> {} for user {}",
                claims.session_id, tokens.session_id, user.id
            );

            Ok(tokens)
        })
        .await
    }

    /// Validate a bearer access token against its live session
    pub async fn validate_access(&self, access_token: &str) -> AuthResult<TokenClaims> {
        with_timeout(
            self.config.operation_timeout,
            self.tokens.validate_access(access_token),
        )
        .await
    }

    /// Revoke the session behind an authenticated request
    ///
    /// Idempotent: logging out an already revoked session succeeds.
    pub async fn logout(&self, claims: &TokenClaims) -> AuthResult<()> {
        with_timeout(self.config.operation_timeout, async {
            if self.tokens.revoke_session(claims.session_id).await? {
                info!("User {} logged out (session {})", claims.user_id, claims.session_id);
            }
            Ok(())
        })
        .await
    }

    /// Revoke every session of the authenticated user
    pub async fn logout_all(&self, claims: &TokenClaims) -> AuthResult<u64> {
        with_timeout(self.config.operation_timeout, async {
            let revoked = self.tokens.revoke_all(claims.user_id).await?;
            info!("User {} revoked {revoked} sessions", claims.user_id);
            Ok(revoked)
        })
        .await
    }

    /// Delete expired sessions, expired codes, and elapsed limiter windows
    pub async fn cleanup_expired(&self) -> AuthResult<SweepReport> {
        let report = SweepReport {
            sessions: self.tokens.cleanup_expired_sessions().await?,
            otp_codes: self.otp.cleanup_expired().await?,
            rate_limit_buckets: self.limiter.prune().await,
        };
        debug!("Maintenance sweep: {report:?}");
        Ok(report)
    }

    async fn gate(&self, key: &str, rule: RateLimitRule) -> AuthResult<()> {
        if self.limiter.allow(key, rule.limit, rule.window).await {
            Ok(())
        } else {
            warn!(target: "security", "Rate limit exceeded for {}", redact_key(key));
            Err(AuthError::RateLimited)
        }
    }

    async fn hash_password(&self, password: String) -> AuthResult<String> {
        let hasher = Arc::clone(&self.hasher);
        run_blocking(move || hasher.hash(&password)).await
    }

    async fn verify_password(&self, password: String, encoded: String) -> AuthResult<bool> {
        let hasher = Arc::clone(&self.hasher);
        run_blocking(move || hasher.verify(&password, &encoded)).await
    }
}

/// Run CPU-bound work off the async workers
async fn run_blocking<T, F>(work: F) -> AuthResult<T>
where
    F: FnOnce() -> AuthResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AuthError::TaskFailed(e.to_string()))?
}

/// Mask the phone part of a limiter key for logging
fn redact_key(key: &str) -> String {
    match key.rsplit_once(":phone:") {
        Some((flow, phone)) => format!("{flow}:phone:{}", mask_phone(phone)),
        None => key.to_string(),
    }
}
