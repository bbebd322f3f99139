//! Caller-configured deadlines for auth operations.
//!
//! The core never picks a deadline on its own; whoever builds the
//! [`AuthManager`](crate::AuthManager) decides whether flows are bounded.

use std::{future::Future, time::Duration};
use tokio::time::timeout;

use crate::auth::{AuthError, AuthResult};

/// Run `future`, bounded by `deadline` when one is given
///
/// On expiry the future is dropped, which cancels any in-flight store or
/// cache I/O it owns.
///
/// # Example
///
/// ```
/// use phone_auth::timeouts::with_timeout;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let value = with_timeout(Some(Duration::from_secs(1)), async { Ok(7) }).await;
/// assert_eq!(value.unwrap(), 7);
/// # }
/// ```
pub async fn with_timeout<F, T>(deadline: Option<Duration>, future: F) -> AuthResult<T>
where
    F: Future<Output = AuthResult<T>>,
{
    match deadline {
        Some(duration) => match timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(duration)),
        },
        None => future.await,
    }
}
