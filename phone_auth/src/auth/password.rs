//! One-way password hashing with bcrypt or Argon2id.
//!
//! The algorithm is chosen once from configuration and used for both hashing
//! and verification for the lifetime of the process. Argon2id hashes are
//! stored in PHC string format:
//!
//! ```text
//! $argon2id$v=19$m=<mem>,t=<iter>,p=<par>$<b64 salt>$<b64 hash>
//! ```
//!
//! That string is a storage contract: [`Argon2Hasher::verify`] must be able
//! to re-derive the hash from nothing but the string and the password.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        Error as PhcError, PasswordHash, PasswordHasher as PhcHasher,
        PasswordVerifier as PhcVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use std::sync::Arc;

use super::errors::{AuthError, AuthResult};

/// Lowest bcrypt cost accepted
pub const BCRYPT_MIN_COST: u32 = 4;
/// Highest bcrypt cost accepted
pub const BCRYPT_MAX_COST: u32 = 31;
/// Default bcrypt cost
pub const BCRYPT_DEFAULT_COST: u32 = 12;

/// Password hashing algorithm
pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into a self-describing encoded string
    fn hash(&self, password: &str) -> AuthResult<String>;

    /// Check a password against an encoded hash
    ///
    /// Returns `Ok(false)` for a wrong password and `Err(AuthError::MalformedHash)`
    /// when the encoded string cannot be parsed.
    fn verify(&self, password: &str, encoded: &str) -> AuthResult<bool>;

    /// Algorithm name
    fn algorithm(&self) -> &'static str;
}

/// Argon2id cost parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
    /// Random salt length in bytes
    pub salt_len: usize,
    /// Derived key length in bytes
    pub key_len: usize,
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 2,
            salt_len: 16,
            key_len: 32,
        }
    }
}

/// Configured hashing algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordAlgorithm {
    Bcrypt { cost: u32 },
    Argon2id(Argon2Params),
}

impl Default for PasswordAlgorithm {
    fn default() -> Self {
        PasswordAlgorithm::Argon2id(Argon2Params::default())
    }
}

/// Build the hasher for the configured algorithm
///
/// # Errors
///
/// * `AuthError::Validation` - Cost or Argon2 parameters out of range
pub fn build_hasher(algorithm: &PasswordAlgorithm) -> AuthResult<Arc<dyn PasswordHasher>> {
    Ok(match algorithm {
        PasswordAlgorithm::Bcrypt { cost } => Arc::new(BcryptHasher::new(*cost)?),
        PasswordAlgorithm::Argon2id(params) => Arc::new(Argon2Hasher::new(params.clone())?),
    })
}

/// bcrypt hasher; the salt lives inside bcrypt's own encoding
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> AuthResult<Self> {
        if !(BCRYPT_MIN_COST..=BCRYPT_MAX_COST).contains(&cost) {
            return Err(AuthError::Validation(format!(
                "bcrypt cost must be between {BCRYPT_MIN_COST} and {BCRYPT_MAX_COST}, got {cost}"
            )));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::Hashing(e.to_string()))
    }

    fn verify(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        bcrypt::verify(password, encoded).map_err(|_| AuthError::MalformedHash)
    }

    fn algorithm(&self) -> &'static str {
        "bcrypt"
    }
}

/// Argon2id hasher producing PHC strings
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Argon2Params,
    argon2_params: Params,
}

impl Argon2Hasher {
    pub fn new(params: Argon2Params) -> AuthResult<Self> {
        // Salt must fit a PHC salt field (4..=64 base64 chars)
        if !(8..=48).contains(&params.salt_len) {
            return Err(AuthError::Validation(format!(
                "argon2 salt length must be between 8 and 48 bytes, got {}",
                params.salt_len
            )));
        }

        let argon2_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(params.key_len),
        )
        .map_err(|e| AuthError::Validation(format!("invalid argon2 parameters: {e}")))?;

        Ok(Self {
            params,
            argon2_params,
        })
    }

    pub fn params(&self) -> &Argon2Params {
        &self.params
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        let mut salt_bytes = vec![0u8; self.params.salt_len];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::Hashing(e.to_string()))?;

        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            self.argon2_params.clone(),
        );

        Ok(argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .to_string())
    }

    fn verify(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded).map_err(|_| AuthError::MalformedHash)?;

        if parsed.algorithm.as_str() != "argon2id"
            || parsed.version != Some(Version::V0x13 as u32)
            || parsed.salt.is_none()
            || parsed.hash.is_none()
        {
            return Err(AuthError::MalformedHash);
        }

        // Parameters come from the encoded string, not from `self`
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(PhcError::Password) => Ok(false),
            Err(_) => Err(AuthError::MalformedHash),
        }
    }

    fn algorithm(&self) -> &'static str {
        "argon2id"
    }
}
