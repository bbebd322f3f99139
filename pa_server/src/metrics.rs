//! Prometheus metrics for authentication traffic.
//!
//! Counters are recorded through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs the Prometheus exporter.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use pa_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::login_total("success");
//! metrics::rate_limited_total("send_otp");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

/// Increment login counter; `outcome` is `success`, `invalid_credentials`, ...
pub fn login_total(outcome: &str) {
    metrics::counter!("auth_logins_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Increment OTP dispatch counter.
pub fn otp_sent_total() {
    metrics::counter!("auth_otp_sent_total").increment(1);
}

/// Increment rate limit rejections for a flow.
pub fn rate_limited_total(flow: &str) {
    metrics::counter!("auth_rate_limited_total",
        "flow" => flow.to_string()
    )
    .increment(1);
}

/// Increment refresh counter; `outcome` is `success` or `rejected`.
pub fn refresh_total(outcome: &str) {
    metrics::counter!("auth_refresh_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Add sessions removed by the sweep.
pub fn sessions_cleaned_total(count: u64) {
    metrics::counter!("auth_sessions_cleaned_total").increment(count);
}
