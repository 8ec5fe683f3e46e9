//! Prometheus metrics for the request pipeline.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `getfit_requests_total` - Completed requests (labels: handler, status)
//! - `getfit_faults_total` - Faults rendered by the exception boundary (label: kind)
//! - `getfit_rate_limit_rejections_total` - Requests rejected with 429
//!
//! ## Histograms
//! - `getfit_request_duration_seconds` - Pipeline duration (label: handler)
//!
//! ## Gauges
//! - `getfit_rate_limit_tracked_keys` - Keys held by the shared rate limit store
//!
//! Recording functions are no-ops until [`init_metrics`] installs the exporter.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

use crate::error::ErrorKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "getfit_requests_total";
    pub const FAULTS_TOTAL: &str = "getfit_faults_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "getfit_rate_limit_rejections_total";
    pub const REQUEST_DURATION_SECONDS: &str = "getfit_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_KEYS: &str = "getfit_rate_limit_tracked_keys";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. port in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(names::REQUESTS_TOTAL, "Total number of completed API requests");
    describe_counter!(
        names::FAULTS_TOTAL,
        "Total number of faults rendered as error envelopes"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Pipeline request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_KEYS,
        "Number of identities tracked by the rate limit store"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a completed request and its duration.
pub fn record_request(handler: &str, status: u16, duration_secs: f64) {
    counter!(names::REQUESTS_TOTAL, "handler" => handler.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "handler" => handler.to_string())
        .record(duration_secs);
}

pub fn record_fault(kind: ErrorKind) {
    counter!(names::FAULTS_TOTAL, "kind" => kind.code()).increment(1);
}

pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

pub fn set_tracked_keys(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_KEYS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these must be silent no-ops.

    #[test]
    fn test_record_request() {
        record_request("login", 200, 0.01);
    }

    #[test]
    fn test_record_fault() {
        record_fault(ErrorKind::NotFound);
        record_fault(ErrorKind::InternalServerError);
    }

    #[test]
    fn test_rate_limit_metrics() {
        record_rate_limit_rejection();
        set_tracked_keys(3);
    }
}
