//! PostgreSQL-backed code ledger over the `otp_codes` and
//! `phone_verifications` tables.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{OtpLedger, OtpPolicy, OtpPurpose, generate_code, ledger::codes_match};
use crate::auth::{AuthError, AuthResult};

/// PostgreSQL implementation of `OtpLedger`
///
/// Consumption is a conditional `DELETE` that must affect exactly one row,
/// so two concurrent verifications of the same code cannot both succeed.
pub struct PgOtpLedger {
    pool: Arc<PgPool>,
    max_attempts: u32,
}

impl PgOtpLedger {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self::with_max_attempts(pool, OtpPolicy::default().max_attempts)
    }

    pub fn with_max_attempts(pool: Arc<PgPool>, max_attempts: u32) -> Self {
        Self {
            pool,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn delete(&self, phone: &str, purpose: OtpPurpose) -> AuthResult<()> {
        sqlx::query("DELETE FROM otp_codes WHERE phone = $1 AND purpose = $2")
            .bind(phone)
            .bind(purpose.as_str())
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OtpLedger for PgOtpLedger {
    async fn create_otp(
        &self,
        phone: &str,
        purpose: OtpPurpose,
        digits: u32,
        ttl: Duration,
    ) -> AuthResult<(String, DateTime<Utc>)> {
        let code = generate_code(digits)?;
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            r#"
            INSERT INTO otp_codes (phone, purpose, code, attempts, expires_at)
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (phone, purpose)
            DO UPDATE SET code = EXCLUDED.code,
                          attempts = 0,
                          expires_at = EXCLUDED.expires_at,
                          created_at = NOW()
            "#,
        )
        .bind(phone)
        .bind(purpose.as_str())
        .bind(&code)
        .bind(expires_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok((code, expires_at))
    }

    async fn verify(&self, phone: &str, code: &str, purpose: OtpPurpose) -> AuthResult<bool> {
        let row = sqlx::query(
            "SELECT code, expires_at FROM otp_codes WHERE phone = $1 AND purpose = $2",
        )
        .bind(phone)
        .bind(purpose.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(AuthError::OtpInvalid)?;

        let stored: String = row.try_get("code")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

        if Utc::now() > expires_at {
            self.delete(phone, purpose).await?;
            return Err(AuthError::OtpExpired);
        }

        if codes_match(&stored, code) {
            let consumed = sqlx::query(
                "DELETE FROM otp_codes WHERE phone = $1 AND purpose = $2 AND code = $3",
            )
            .bind(phone)
            .bind(purpose.as_str())
            .bind(&stored)
            .execute(self.pool.as_ref())
            .await?;

            // Lost the race to a concurrent verification or replacement
            if consumed.rows_affected() != 1 {
                return Err(AuthError::OtpInvalid);
            }
            return Ok(true);
        }

        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE otp_codes SET attempts = attempts + 1
            WHERE phone = $1 AND purpose = $2
            RETURNING attempts
            "#,
        )
        .bind(phone)
        .bind(purpose.as_str())
        .fetch_optional(self.pool.as_ref())
        .await?;

        if let Some(attempts) = attempts
            && attempts >= self.max_attempts as i32
        {
            self.delete(phone, purpose).await?;
        }

        Err(AuthError::OtpInvalid)
    }

    async fn mark_phone_verified(&self, phone: &str) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO phone_verifications (phone, verified_at)
            VALUES ($1, NOW())
            ON CONFLICT (phone) DO UPDATE SET verified_at = NOW()
            "#,
        )
        .bind(phone)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn is_phone_verified(&self, phone: &str) -> AuthResult<bool> {
        let verified: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM phone_verifications WHERE phone = $1)")
                .bind(phone)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(verified)
    }

    async fn cleanup_expired(&self) -> AuthResult<u64> {
        let result = sqlx::query("DELETE FROM otp_codes WHERE expires_at < NOW()")
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseConfig};

    async fn ledger() -> PgOtpLedger {
        let config = DatabaseConfig {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DatabaseConfig::development().database_url),
            ..DatabaseConfig::development()
        };
        let db = Database::new(&config).await.unwrap();
        PgOtpLedger::with_max_attempts(Arc::new(db.pool().clone()), 2)
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_pg_single_use_and_attempt_cap() {
        let ledger = ledger().await;
        let phone = format!("+1555{:07}", rand::random::<u32>() % 10_000_000);

        let (code, _) = ledger
            .create_otp(&phone, OtpPurpose::PhoneVerify, 6, Duration::minutes(5))
            .await
            .unwrap();
        assert!(ledger.verify(&phone, &code, OtpPurpose::PhoneVerify).await.unwrap());
        assert!(matches!(
            ledger.verify(&phone, &code, OtpPurpose::PhoneVerify).await,
            Err(AuthError::OtpInvalid)
        ));

        let (code, _) = ledger
            .create_otp(&phone, OtpPurpose::Login, 6, Duration::minutes(5))
            .await
            .unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(ledger.verify(&phone, wrong, OtpPurpose::Login).await.is_err());
        assert!(ledger.verify(&phone, wrong, OtpPurpose::Login).await.is_err());
        assert!(matches!(
            ledger.verify(&phone, &code, OtpPurpose::Login).await,
            Err(AuthError::OtpInvalid)
        ));
    }

    #[tokio::test]
    #[ignore = "Requires database setup"]
    async fn test_pg_verified_marker() {
        let ledger = ledger().await;
        let phone = format!("+1666{:07}", rand::random::<u32>() % 10_000_000);

        assert!(!ledger.is_phone_verified(&phone).await.unwrap());
        ledger.mark_phone_verified(&phone).await.unwrap();
        assert!(ledger.is_phone_verified(&phone).await.unwrap());
    }
}
