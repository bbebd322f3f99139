//! JWT access and refresh token signing and verification.
//!
//! Both token kinds are HS256-signed and carry the same registered claims;
//! a `token_type` claim keeps them apart so an access token can never be
//! accepted where a refresh token is expected, or the other way round, even
//! though they share a signing key.
//!
//! Every token carries a `kid` header. Verification looks the key up by
//! `kid`, which today resolves to the single active key.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    errors::{AuthError, AuthResult},
    models::{Role, SessionId, TokenClaims, UserId},
};

/// Default access token lifetime (15 minutes)
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 900;
/// Default refresh token lifetime (30 days)
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 30 * 24 * 3600;

/// JWT configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// HMAC-SHA256 signing secret
    pub secret: String,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// `kid` header of the active key
    pub key_id: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
}

impl JwtConfig {
    /// Configuration with default issuer, audience, key id, and lifetimes
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: "phone-auth".to_string(),
            audience: "phone-auth-clients".to_string(),
            key_id: "primary".to_string(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
        }
    }
}

/// Token kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Wire claims
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    jti: String,
    role: Role,
    phone: String,
    iss: String,
    aud: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    token_type: TokenType,
}

/// Signs and verifies access and refresh tokens
pub struct JwtCodec {
    issuer: String,
    audience: String,
    active_kid: String,
    encoding_key: EncodingKey,
    decoding_keys: HashMap<String, DecodingKey>,
    validation: Validation,
}

impl JwtCodec {
    /// Create a codec from configuration
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - Empty secret or key id
    pub fn new(config: &JwtConfig) -> AuthResult<Self> {
        if config.secret.is_empty() {
            return Err(AuthError::Validation("JWT secret must not be empty".to_string()));
        }
        if config.key_id.is_empty() {
            return Err(AuthError::Validation("JWT key id must not be empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss", "aud"]);

        let mut decoding_keys = HashMap::new();
        decoding_keys.insert(
            config.key_id.clone(),
            DecodingKey::from_secret(config.secret.as_bytes()),
        );

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            active_kid: config.key_id.clone(),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_keys,
            validation,
        })
    }

    /// Sign an access token
    pub fn sign_access(
        &self,
        user_id: UserId,
        session_id: SessionId,
        role: Role,
        phone: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        self.sign(TokenType::Access, user_id, session_id, role, phone, expires_at)
    }

    /// Sign a refresh token
    pub fn sign_refresh(
        &self,
        user_id: UserId,
        session_id: SessionId,
        role: Role,
        phone: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        self.sign(TokenType::Refresh, user_id, session_id, role, phone, expires_at)
    }

    /// Verify an access token and return its claims
    ///
    /// Only checks the token itself; session liveness is the token
    /// service's job.
    pub fn verify_access(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify(token, TokenType::Access)
    }

    /// Verify a refresh token and return its claims
    pub fn verify_refresh(&self, token: &str) -> AuthResult<TokenClaims> {
        self.verify(token, TokenType::Refresh)
    }

    fn sign(
        &self,
        token_type: TokenType,
        user_id: UserId,
        session_id: SessionId,
        role: Role,
        phone: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            jti: session_id.to_string(),
            role,
            phone: phone.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            nbf: now,
            exp: expires_at.timestamp(),
            token_type,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.active_kid.clone());

        Ok(encode(&header, &claims, &self.encoding_key)?)
    }

    fn verify(&self, token: &str, expected: TokenType) -> AuthResult<TokenClaims> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::HS256 {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".to_string()))?;
        let key = self
            .decoding_keys
            .get(&kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown key id '{kid}'")))?;

        let claims = decode::<Claims>(token, key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;

        if claims.token_type != expected {
            return Err(AuthError::InvalidToken(format!(
                "expected {expected:?} token, got {:?}",
                claims.token_type
            )));
        }

        let user_id = claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidToken("malformed subject".to_string()))?;
        let session_id = Uuid::parse_str(&claims.jti)
            .map_err(|_| AuthError::InvalidToken("malformed token id".to_string()))?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::InvalidToken("malformed expiry".to_string()))?;

        Ok(TokenClaims {
            user_id,
            phone: claims.phone,
            role: claims.role,
            session_id,
            expires_at,
        })
    }
}
