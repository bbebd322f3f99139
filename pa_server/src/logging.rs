//! Structured logging configuration.
//!
//! Records from the `log` facade (used by the `phone_auth` library) are
//! bridged into the same subscriber, so one filter governs both.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize structured logging
///
/// Levels come from `RUST_LOG`. `LogFormat::Json` emits one JSON object
/// per event for log shippers.
///
/// # Example
///
/// ```no_run
/// use pa_server::{config::LogFormat, logging};
///
/// #[tokio::main]
/// async fn main() {
///     logging::init(LogFormat::Pretty);
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .init();

    tracing::info!(?format, "Structured logging initialized");
}

/// Log security event with structured data
///
/// Never pass secrets, codes, or tokens in `message`.
///
/// # Example
///
/// ```
/// use pa_server::logging::log_security_event;
///
/// log_security_event(
///     "failed_login",
///     None,
///     Some("192.168.1.1"),
///     "Invalid credentials",
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    user_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}
