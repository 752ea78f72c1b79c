//! Prometheus metrics for Brownout.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `brownout_decisions_total` | Counter | `outcome` | Gate decisions |
//! | `brownout_load_metric` | Gauge | - | Last sampled load in `[0, 1]` |
//! | `brownout_metric_failures_total` | Counter | `reason` | Failed load samples |
//! | `brownout_rejection_handler_errors_total` | Counter | `status` | Rejection handlers that returned an error |
//!
//! Recording functions go through the `metrics` facade and are no-ops until a
//! recorder is installed with [`init_metrics`].

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Gate decision counter name.
pub const DECISIONS_TOTAL: &str = "brownout_decisions_total";

/// Load gauge name.
pub const LOAD_METRIC: &str = "brownout_load_metric";

/// Metric failure counter name.
pub const METRIC_FAILURES_TOTAL: &str = "brownout_metric_failures_total";

/// Rejection handler error counter name.
pub const REJECTION_HANDLER_ERRORS_TOTAL: &str = "brownout_rejection_handler_errors_total";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Initializes the Prometheus exporter and registers metric descriptions.
///
/// Does nothing when `config.enabled` is false.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the recorder cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(DECISIONS_TOTAL, "Load-shedding gate decisions by outcome");
    describe_gauge!(LOAD_METRIC, "Most recent normalized load sample");
    describe_counter!(
        METRIC_FAILURES_TOTAL,
        "Load samples that failed; the gate admitted the request"
    );
    describe_counter!(
        REJECTION_HANDLER_ERRORS_TOTAL,
        "Rejection handlers that returned an explicit error"
    );
}

/// Records one gate decision.
///
/// `outcome` is one of `admitted`, `shed`, `bypassed`, `failed_open`.
pub fn record_decision(outcome: &'static str) {
    counter!(DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Records the most recent load sample.
pub fn record_load(value: f64) {
    gauge!(LOAD_METRIC).set(value);
}

/// Records a failed load sample.
pub fn record_metric_failure(reason: &'static str) {
    counter!(METRIC_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Records a rejection handler that returned an error.
pub fn record_rejection_handler_error(status_code: u16) {
    counter!(
        REJECTION_HANDLER_ERRORS_TOTAL,
        "status" => status_code.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            addr: "not an address".to_string(),
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: "not an address".to_string(),
        };
        let err = init_metrics(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_decision("admitted");
        record_decision("shed");
        record_load(0.93);
        record_metric_failure("timeout");
        record_rejection_handler_error(500);
    }
}
