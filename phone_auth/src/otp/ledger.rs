//! Code storage: the `OtpLedger` trait and its in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use super::{OtpPolicy, OtpPurpose, generate_code};
use crate::auth::{AuthError, AuthResult};

/// Storage and verification of one-time codes
#[async_trait]
pub trait OtpLedger: Send + Sync {
    /// Issue a fresh code for `(phone, purpose)`, replacing any prior one
    ///
    /// # Errors
    ///
    /// * `AuthError::Validation` - `digits` outside 4..=10
    async fn create_otp(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        digits: u32,
        ttl: Duration,
    ) -> AuthResult<(String, DateTime<Utc>)>;

    /// Check `code` against the live record for `(phone, purpose)`
    ///
    /// A match consumes the record and returns `Ok(true)`.
    ///
    /// # Errors
    ///
    /// * `AuthError::OtpExpired` - The record expired; it is deleted
    /// * `AuthError::OtpInvalid` - No record, or the code differs
    async fn verify(&self, phone: &str, code: &str, purpose: OtpPurpose) -> AuthResult<bool>;

    /// Remember that `phone` proved possession through a code
    async fn mark_phone_verified(&self, phone: &str) -> AuthResult<()>;

    /// Whether `phone` was ever marked verified
    async fn is_phone_verified(&self, phone: &str) -> AuthResult<bool>;

    /// Delete expired records, returning how many were deleted
    async fn cleanup_expired(&self) -> AuthResult<u64>;
}

pub(crate) fn codes_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[derive(Debug, Clone)]
struct OtpRecord {
    code: String,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

/// `OtpLedger` backed by maps
///
/// Meant for tests and single-process development runs. Verified-phone
/// markers never expire, so the marker set grows with every distinct phone
/// verified for the life of the process; `cleanup_expired` only drops codes.
pub struct InMemoryOtpLedger {
    records: RwLock<HashMap<(String, OtpPurpose), OtpRecord>>,
    /// Phones proven through a `PhoneVerify` code; unbounded
    verified: RwLock<HashSet<String>>,
    max_attempts: u32,
}

impl InMemoryOtpLedger {
    pub fn new() -> Self {
        Self::with_max_attempts(OtpPolicy::default().max_attempts)
    }

    /// Ledger that destroys a code after `max_attempts` wrong guesses
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            verified: RwLock::new(HashSet::new()),
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for InMemoryOtpLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtpLedger for InMemoryOtpLedger {
    async fn create_otp(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        digits: u32,
        ttl: Duration,
    ) -> AuthResult<(String, DateTime<Utc>)> {
        let code = generate_code(digits)?;
        let expires_at = Utc::now() + ttl;

        self.records.write().await.insert(
            (phone.to_string(), purpose),
            OtpRecord {
                code: code.clone(),
                expires_at,
                attempts: 0,
            },
        );

        Ok((code, expires_at))
    }

    async fn verify(&self, phone: &str, code: &str, purpose: OtpPurpose) -> AuthResult<bool> {
        let key = (phone.to_string(), purpose);
        let mut records = self.records.write().await;

        let record = records.get_mut(&key).ok_or(AuthError::OtpInvalid)?;

        if Utc::now() > record.expires_at {
            records.remove(&key);
            return Err(AuthError::OtpExpired);
        }

        if codes_match(&record.code, code) {
            records.remove(&key);
            return Ok(true);
        }

        record.attempts += 1;
        if record.attempts >= self.max_attempts {
            records.remove(&key);
        }
        Err(AuthError::OtpInvalid)
    }

    async fn mark_phone_verified(&self, phone: &str) -> AuthResult<()> {
        self.verified.write().await.insert(phone.to_string());
        Ok(())
    }

    async fn is_phone_verified(&self, phone: &str) -> AuthResult<bool> {
        Ok(self.verified.read().await.contains(phone))
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.expires_at >= now);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "+989123456789";

    #[tokio::test]
    async fn test_code_shape_and_expiry() {
        let ledger = InMemoryOtpLedger::new();
        let before = Utc::now();
        let (code, expires_at) = ledger
            .create_otp(PHONE, OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        let drift = (expires_at - before - Duration::minutes(5)).num_seconds().abs();
        assert!(drift <= 1);
    }

    #[tokio::test]
    async fn test_single_use() {
        let ledger = InMemoryOtpLedger::new();
        let (code, _) = ledger
            .create_otp(PHONE, OtpPurpose::Login, 6, Duration::minutes(5))
            .await
            .unwrap();

        assert!(ledger.verify(PHONE, &code, OtpPurpose::Login).await.unwrap());
        assert!(matches!(
            ledger.verify(PHONE, &code, OtpPurpose::Login).await,
            Err(AuthError::OtpInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_rejected_even_if_correct() {
        let ledger = InMemoryOtpLedger::new();
        let (code, _) = ledger
            .create_otp(PHONE, OtpPurpose::PhoneVerify, 6, Duration::seconds(-1))
            .await
            .unwrap();

        assert!(matches!(
            ledger.verify(PHONE, &code, OtpPurpose::PhoneVerify).await,
            Err(AuthError::OtpExpired)
        ));
        // Expired record is gone
        assert!(matches!(
            ledger.verify(PHONE, &code, OtpPurpose::PhoneVerify).await,
            Err(AuthError::OtpInvalid)
        ));
    }

    #[tokio::test]
    async fn test_purpose_mismatch_is_invalid() {
        let ledger = InMemoryOtpLedger::new();
        let (code, _) = ledger
            .create_otp(PHONE, OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
            .await
            .unwrap();

        assert!(matches!(
            ledger.verify(PHONE, &code, OtpPurpose::PasswordReset).await,
            Err(AuthError::OtpInvalid)
        ));
        assert!(
            ledger
                .verify(PHONE, &code, OtpPurpose::PhoneVerify)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_new_code_replaces_old() {
        let ledger = InMemoryOtpLedger::new();
        let (first, _) = ledger
            .create_otp(PHONE, OtpPurpose::Login, 8, Duration::minutes(5))
            .await
            .unwrap();
        let (second, _) = ledger
            .create_otp(PHONE, OtpPurpose::Login, 8, Duration::minutes(5))
            .await
            .unwrap();

        if first != second {
            assert!(ledger.verify(PHONE, &first, OtpPurpose::Login).await.is_err());
        }
        assert!(ledger.verify(PHONE, &second, OtpPurpose::Login).await.unwrap());
    }

    #[tokio::test]
    async fn test_attempt_cap_destroys_record() {
        let ledger = InMemoryOtpLedger::with_max_attempts(3);
        let (code, _) = ledger
            .create_otp(PHONE, OtpPurpose::Login, 6, Duration::minutes(5))
            .await
            .unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..3 {
            assert!(matches!(
                ledger.verify(PHONE, wrong, OtpPurpose::Login).await,
                Err(AuthError::OtpInvalid)
            ));
        }
        assert!(matches!(
            ledger.verify(PHONE, &code, OtpPurpose::Login).await,
            Err(AuthError::OtpInvalid)
        ));
    }

    #[tokio::test]
    async fn test_verified_marker() {
        let ledger = InMemoryOtpLedger::new();
        assert!(!ledger.is_phone_verified(PHONE).await.unwrap());
        ledger.mark_phone_verified(PHONE).await.unwrap();
        ledger.mark_phone_verified(PHONE).await.unwrap();
        assert!(ledger.is_phone_verified(PHONE).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let ledger = InMemoryOtpLedger::new();
        ledger
            .create_otp(PHONE, OtpPurpose::Login, 6, Duration::seconds(-1))
            .await
            .unwrap();
        ledger
            .create_otp(PHONE, OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(ledger.cleanup_expired().await.unwrap(), 1);
        assert_eq!(ledger.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_verified_markers() {
        let ledger = InMemoryOtpLedger::new();
        let (code, _) = ledger
            .create_otp(PHONE, OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
            .await
            .unwrap();
        assert!(ledger.verify(PHONE, &code, OtpPurpose::PhoneVerify).await.unwrap());
        ledger.mark_phone_verified(PHONE).await.unwrap();
        ledger
            .create_otp(PHONE, OtpPurpose::Login, 6, Duration::seconds(-1))
            .await
            .unwrap();

        assert_eq!(ledger.cleanup_expired().await.unwrap(), 1);
        assert!(ledger.is_phone_verified(PHONE).await.unwrap());
    }

    #[test]
    fn test_codes_match() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "123457"));
        assert!(!codes_match("123456", "12345"));
        assert!(!codes_match("123456", ""));
    }
}
