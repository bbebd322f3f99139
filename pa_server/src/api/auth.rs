//! Authentication API handlers.
//!
//! This module provides the HTTP endpoints for phone authentication:
//! - OTP send and verification
//! - Registration on a verified phone
//! - Login with phone and password
//! - Token refresh (rotating) and logout
//!
//! Request and response bodies use camelCase field names.
//!
//! # Examples
//!
//! Request a verification code:
//! ```bash
//! curl -X POST http://localhost:8080/auth/send-otp \
//!   -H "Content-Type: application/json" \
//!   -d '{"phone": "+989123456789", "purpose": "phone_verify", "channel": "sms"}'
//! ```
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"phone": "+989123456789", "password": "password123456"}'
//! ```

use axum::{
    Json,
    extract::{ConnectInfo, Extension, FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use chrono::{DateTime, Utc};
use phone_auth::{
    AuthError, ClientInfo, TokenClaims,
    auth::{
        IssuedTokens, LoginRequest, RegisterRequest, Role, SendOtpRequest, SessionId, UserId,
        VerifyOtpRequest,
    },
    otp::OtpPurpose,
};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use super::{AppState, error::ApiError};
use crate::{logging::log_security_event, metrics};

/// Longest user agent stored on a session
const MAX_USER_AGENT_LEN: usize = 256;

/// Client metadata taken from the request
///
/// The IP is the socket peer address. When the peer is one of the trusted
/// proxies, `X-Forwarded-For` is walked from the right and the first hop
/// that is not itself a trusted proxy is used instead.
#[derive(Debug, Clone, Default)]
pub struct Client(pub ClientInfo);

impl FromRequestParts<AppState> for Client {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(Client(client_info(&parts.headers, peer, &state.trusted_proxies)))
    }
}

/// Resolve client metadata from headers and the connecting peer
pub fn client_info(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[IpAddr]) -> ClientInfo {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect());

    let ip = match peer {
        Some(peer) if trusted.contains(&peer) => {
            Some(forwarded_client(headers, trusted).unwrap_or(peer))
        }
        other => other,
    };

    ClientInfo {
        user_agent,
        ip: ip.map(|ip| ip.to_string()),
    }
}

/// Nearest `X-Forwarded-For` hop not added by a trusted proxy
///
/// Gives up at the first unparsable hop.
fn forwarded_client(headers: &HeaderMap, trusted: &[IpAddr]) -> Option<IpAddr> {
    let hops = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .collect::<Vec<_>>();

    for hop in hops.into_iter().rev() {
        let ip = hop.parse::<IpAddr>().ok()?;
        if !trusted.contains(&ip) {
            return Some(ip);
        }
    }
    None
}

/// Count and log a failed flow
fn observe_failure(flow: &'static str, client: &ClientInfo, err: &AuthError) {
    if matches!(err, AuthError::RateLimited) {
        metrics::rate_limited_total(flow);
        log_security_event("rate_limited", None, client.ip.as_deref(), flow);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpPayload {
    pub phone: String,
    pub purpose: OtpPurpose,
    pub channel: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpResponse {
    pub sent: bool,
    pub expires_in_sec: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpPayload {
    pub phone: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub phone: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub display_name: Option<String>,
    #[serde(default)]
    pub auto_login: bool,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub user_id: UserId,
    pub role: Role,
    pub is_phone_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub access_token_expires_in: i64,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            access_token_expires_in: tokens.access_expires_in,
            refresh_token: tokens.refresh_token,
            refresh_token_expires_at: tokens.refresh_expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub role: Role,
    pub is_phone_verified: bool,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenResponse,
    pub user: UserSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub success: bool,
    pub revoked: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: UserId,
    pub phone: String,
    pub role: Role,
    pub session_id: SessionId,
}

/// Issue a one-time code and hand it to the OTP transport.
///
/// # Response
///
/// `200 OK` with `{"sent": true, "expiresInSec": 300}`
///
/// # Errors
///
/// - `400 bad_request`: Malformed phone or body
/// - `429 rate_limited`: Too many codes for this phone or IP
pub async fn send_otp(
    State(state): State<AppState>,
    Client(client): Client,
    payload: Result<Json<SendOtpPayload>, JsonRejection>,
) -> Result<Json<SendOtpResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = SendOtpRequest {
        phone: payload.phone,
        purpose: payload.purpose,
        channel: payload.channel,
    };

    let dispatch = state
        .auth_manager
        .send_otp(request, &client)
        .await
        .inspect_err(|e| observe_failure("send_otp", &client, e))?;

    metrics::otp_sent_total();
    Ok(Json(SendOtpResponse {
        sent: true,
        expires_in_sec: dispatch.expires_in_secs,
    }))
}

/// Check a one-time code.
///
/// A `phone_verify` code marks the phone as verified for registration.
///
/// # Errors
///
/// - `400 invalid_otp`: Wrong, expired, or already used code
/// - `429 rate_limited`: Too many attempts for this phone
pub async fn verify_otp(
    State(state): State<AppState>,
    Client(client): Client,
    payload: Result<Json<VerifyOtpPayload>, JsonRejection>,
) -> Result<Json<VerifyOtpResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = VerifyOtpRequest {
        phone: payload.phone,
        code: payload.code,
        purpose: payload.purpose,
    };

    let verified = state
        .auth_manager
        .verify_otp(request)
        .await
        .inspect_err(|e| observe_failure("verify_otp", &client, e))?;

    Ok(Json(VerifyOtpResponse { verified }))
}

/// Register a new account on a verified phone.
///
/// With `"autoLogin": true` the response also carries a token pair.
///
/// # Errors
///
/// - `400 bad_request`: Malformed phone or password out of bounds
/// - `403 forbidden`: Phone not verified
/// - `409 conflict`: Phone already registered
/// - `429 rate_limited`: Too many registrations from this IP
pub async fn register(
    State(state): State<AppState>,
    Client(client): Client,
    payload: Result<Json<RegisterPayload>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = RegisterRequest {
        phone: payload.phone,
        password: payload.password,
        role: payload.role,
        display_name: payload.display_name,
        auto_login: payload.auto_login,
    };

    let registration = state
        .auth_manager
        .register(request, &client)
        .await
        .inspect_err(|e| observe_failure("register", &client, e))?;

    let (access_token, refresh_token) = match registration.tokens {
        Some(tokens) => (Some(tokens.access_token), Some(tokens.refresh_token)),
        None => (None, None),
    };

    Ok(Json(RegisterResponse {
        user_id: registration.user.id,
        role: registration.user.role,
        is_phone_verified: registration.user.is_phone_verified,
        access_token,
        refresh_token,
    }))
}

/// Authenticate with phone and password.
///
/// # Response
///
/// ```json
/// {
///   "accessToken": "eyJhbGciOiJIUzI1NiIs...",
///   "accessTokenExpiresIn": 900,
///   "refreshToken": "eyJhbGciOiJIUzI1NiIs...",
///   "refreshTokenExpiresAt": "2026-11-18T10:30:00Z",
///   "user": {"id": 42, "role": "user", "isPhoneVerified": true}
/// }
/// ```
///
/// # Errors
///
/// - `401 unauthorized`: Unknown phone or wrong password (indistinguishable)
/// - `403 forbidden`: Account disabled or phone not verified
/// - `429 rate_limited`: Too many attempts
pub async fn login(
    State(state): State<AppState>,
    Client(client): Client,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload?;
    let request = LoginRequest {
        phone: payload.phone,
        password: payload.password,
    };

    match state.auth_manager.login(request, &client).await {
        Ok((user, tokens)) => {
            metrics::login_total("success");
            Ok(Json(LoginResponse {
                tokens: tokens.into(),
                user: UserSummary {
                    id: user.id,
                    role: user.role,
                    is_phone_verified: user.is_phone_verified,
                },
            }))
        }
        Err(e) => {
            let outcome = e.kind().code();
            metrics::login_total(outcome);
            if matches!(e, AuthError::InvalidCredentials) {
                log_security_event(
                    "failed_login",
                    None,
                    client.ip.as_deref(),
                    "Invalid credentials",
                );
            }
            observe_failure("login", &client, &e);
            Err(e.into())
        }
    }
}

/// Exchange a refresh token for a new pair; the presented token is spent.
///
/// # Errors
///
/// - `401 unauthorized`: Invalid, expired, revoked, or reused refresh token
/// - `429 rate_limited`: Too many refreshes from this IP
pub async fn refresh_token(
    State(state): State<AppState>,
    Client(client): Client,
    payload: Result<Json<RefreshPayload>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(payload) = payload?;

    match state
        .auth_manager
        .refresh(&payload.refresh_token, &client)
        .await
    {
        Ok(tokens) => {
            metrics::refresh_total("success");
            Ok(Json(tokens.into()))
        }
        Err(e) => {
            metrics::refresh_total("rejected");
            if matches!(e, AuthError::InvalidToken(_)) {
                log_security_event(
                    "refresh_rejected",
                    None,
                    client.ip.as_deref(),
                    "Refresh token rejected",
                );
            }
            observe_failure("refresh", &client, &e);
            Err(e.into())
        }
    }
}

/// Revoke the session behind the bearer token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<Json<LogoutResponse>, ApiError> {
    state.auth_manager.logout(&claims).await?;
    Ok(Json(LogoutResponse { success: true }))
}

/// Revoke every session of the bearer's account.
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(claims): Extension<TokenClaims>,
) -> Result<Json<LogoutAllResponse>, ApiError> {
    let revoked = state.auth_manager.logout_all(&claims).await?;
    Ok(Json(LogoutAllResponse {
        success: true,
        revoked,
    }))
}

/// Identity behind the bearer token.
pub async fn me(Extension(claims): Extension<TokenClaims>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: claims.user_id,
        phone: claims.phone,
        role: claims.role,
        session_id: claims.session_id,
    })
}
