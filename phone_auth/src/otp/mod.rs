//! One-time codes proving control of a phone number.
//!
//! A code is bound to a `(phone, purpose)` pair, expires after the policy
//! TTL, and is consumed by the first successful verification. Issuing a new
//! code for the same pair replaces the previous one.
//!
//! ## Example
//!
//! ```
//! use phone_auth::otp::{InMemoryOtpLedger, OtpLedger, OtpPurpose};
//! use chrono::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let ledger = InMemoryOtpLedger::new();
//! let (code, _expires_at) = ledger
//!     .create_otp("+989123456789", OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
//!     .await
//!     .unwrap();
//!
//! assert!(ledger.verify("+989123456789", &code, OtpPurpose::PhoneVerify).await.unwrap());
//! assert!(ledger.verify("+989123456789", &code, OtpPurpose::PhoneVerify).await.is_err());
//! # }
//! ```

pub mod ledger;
pub mod postgres;
pub mod transport;

pub use ledger::{InMemoryOtpLedger, OtpLedger};
pub use postgres::PgOtpLedger;
pub use transport::{LogTransport, OtpTransport};

use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::auth::{AuthError, AuthResult};

/// Shortest code length accepted
pub const MIN_OTP_DIGITS: u32 = 4;
/// Longest code length accepted
pub const MAX_OTP_DIGITS: u32 = 10;

/// What a code is allowed to prove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    PhoneVerify,
    Login,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            OtpPurpose::PhoneVerify => "phone_verify",
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpPurpose {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone_verify" => Ok(OtpPurpose::PhoneVerify),
            "login" => Ok(OtpPurpose::Login),
            "password_reset" => Ok(OtpPurpose::PasswordReset),
            other => Err(AuthError::Validation(format!("unknown OTP purpose '{other}'"))),
        }
    }
}

/// Code length, lifetime, and guess budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpPolicy {
    pub digits: u32,
    pub ttl: Duration,
    /// Wrong guesses tolerated before the code is destroyed
    pub max_attempts: u32,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            digits: 6,
            ttl: Duration::minutes(5),
            max_attempts: 5,
        }
    }
}

/// Draw a code uniformly from `0..10^digits`, zero-padded to `digits`
///
/// # Errors
///
/// * `AuthError::Validation` - `digits` outside 4..=10
pub fn generate_code(digits: u32) -> AuthResult<String> {
    if !(MIN_OTP_DIGITS..=MAX_OTP_DIGITS).contains(&digits) {
        return Err(AuthError::Validation(format!(
            "OTP length must be between {MIN_OTP_DIGITS} and {MAX_OTP_DIGITS} digits"
        )));
    }

    let upper = 10u64.pow(digits);
    let value = rand::rng().random_range(0..upper);
    Ok(format!("{value:0width$}", width = digits as usize))
}
