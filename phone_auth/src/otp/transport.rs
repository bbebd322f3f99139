//! Code delivery seam and phone masking for logs.

use async_trait::async_trait;
use log::info;

use crate::auth::AuthResult;

/// Delivers a code to a phone
///
/// Carrier integration lives behind this trait; the core never knows how a
/// code reaches the user.
#[async_trait]
pub trait OtpTransport: Send + Sync {
    /// Send `code` to `phone`
    ///
    /// # Errors
    ///
    /// * `AuthError::Transport` - Delivery failed
    async fn send(&self, phone: &str, code: &str) -> AuthResult<()>;
}

/// Transport that only records a dispatch in the log
///
/// The code itself is never written out.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl OtpTransport for LogTransport {
    async fn send(&self, phone: &str, code: &str) -> AuthResult<()> {
        info!(
            "OTP dispatched to {} ({} digits)",
            mask_phone(phone),
            code.len()
        );
        Ok(())
    }
}

/// Keep the country prefix and the last two digits, hide the rest
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+989123456789"), "+98********89");
        assert_eq!(mask_phone("+12345"), "******");
    }

    #[tokio::test]
    async fn test_log_transport_succeeds() {
        assert!(LogTransport.send("+989123456789", "123456").await.is_ok());
    }
}
