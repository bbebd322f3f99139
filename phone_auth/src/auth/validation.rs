//! Input checks run before any rate limiter or store is touched.

use super::errors::{AuthError, AuthResult};

/// Minimum password length in characters
pub const MIN_PASSWORD_LEN: usize = 8;
/// Maximum password length in characters
pub const MAX_PASSWORD_LEN: usize = 128;

/// Require an E.164 number: `+`, then 8 to 15 digits, first digit non-zero
pub fn validate_phone(phone: &str) -> AuthResult<()> {
    let digits = phone
        .strip_prefix('+')
        .ok_or_else(|| AuthError::Validation("phone must be in E.164 format".to_string()))?;

    let well_formed = (8..=15).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0');

    if well_formed {
        Ok(())
    } else {
        Err(AuthError::Validation("phone must be in E.164 format".to_string()))
    }
}

/// Require a password of 8 to 128 characters
pub fn validate_password(password: &str) -> AuthResult<()> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if len > MAX_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at most {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
