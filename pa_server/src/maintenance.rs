//! Periodic removal of expired sessions, OTP codes, and limiter windows.

use phone_auth::{AuthManager, AuthResult, auth::SweepReport};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::interval};

use crate::metrics;

/// Run one sweep and record what it removed
pub async fn sweep_once(auth_manager: &AuthManager) -> AuthResult<SweepReport> {
    let report = auth_manager.cleanup_expired().await?;
    metrics::sessions_cleaned_total(report.sessions);

    if report.sessions > 0 || report.otp_codes > 0 {
        tracing::info!(
            sessions = report.sessions,
            otp_codes = report.otp_codes,
            rate_limit_buckets = report.rate_limit_buckets,
            "Expired auth state removed"
        );
    }
    Ok(report)
}

/// Sweep every `period` until the task is aborted
///
/// A failed sweep is logged and retried on the next tick.
pub async fn run_cleanup(auth_manager: Arc<AuthManager>, period: Duration) {
    let mut ticker = interval(period);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&auth_manager).await {
            tracing::warn!(error = %e, "Maintenance sweep failed");
        }
    }
}

/// Spawn [`run_cleanup`] on the runtime
pub fn spawn_cleanup(auth_manager: Arc<AuthManager>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(run_cleanup(auth_manager, period))
}
