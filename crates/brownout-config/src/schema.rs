//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use brownout_core::{cpu_sample_window, default_cpu_sample_timeout, Thresholds};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

/// Load-shedding configuration section.
///
/// # Example
///
/// ```
/// use brownout_config::LoadShedConfig;
/// use std::time::Duration;
///
/// let config = LoadShedConfig::default();
/// assert!((config.lower_threshold - 0.90).abs() < f64::EPSILON);
/// assert!((config.upper_threshold - 0.95).abs() < f64::EPSILON);
/// assert_eq!(config.interval(), Duration::from_secs(1));
/// assert_eq!(config.sample_timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoadShedConfig {
    /// Enable the load-shedding stage.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Load below which requests are always admitted.
    #[serde(default = "default_lower_threshold")]
    pub lower_threshold: f64,

    /// Load above which requests are always shed.
    #[serde(default = "default_upper_threshold")]
    pub upper_threshold: f64,

    /// CPU sampling window and cache lifetime, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on a single load sample, in milliseconds.
    ///
    /// Defaults to twice the interval, and never less than twice the minimum
    /// CPU sampling window. Must outlast the CPU sampling window.
    #[serde(default)]
    pub sample_timeout_ms: Option<u64>,

    /// Request path prefixes that bypass the gate.
    #[serde(default = "default_bypass_paths")]
    pub bypass_paths: Vec<String>,

    /// `Retry-After` value sent with the default 503 response.
    #[serde(default)]
    pub retry_after_secs: Option<u64>,

    /// Message in the default 503 response body.
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lower_threshold: default_lower_threshold(),
            upper_threshold: default_upper_threshold(),
            interval_ms: default_interval_ms(),
            sample_timeout_ms: None,
            bypass_paths: default_bypass_paths(),
            retry_after_secs: None,
            rejection_message: default_rejection_message(),
        }
    }
}

impl LoadShedConfig {
    /// Sampling window and cache lifetime.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Effective sample timeout.
    #[must_use]
    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout_ms.map_or_else(
            || default_cpu_sample_timeout(self.interval()),
            Duration::from_millis,
        )
    }

    /// Validated thresholds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending threshold.
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Ok(Thresholds::new(self.lower_threshold, self.upper_threshold)?)
    }

    /// Validates this section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the thresholds are out of range
    /// or inverted, if a duration is zero, if the sample timeout cannot fit a
    /// CPU sample, or if a bypass path does not start with `/`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds()?;

        if self.interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "load_shed.interval_ms",
                "must be greater than zero",
            ));
        }

        if self.sample_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "load_shed.sample_timeout_ms",
                "must be greater than zero",
            ));
        }

        let timeout = self.sample_timeout();
        let window = cpu_sample_window(self.interval(), timeout);
        if timeout <= window {
            return Err(ConfigError::invalid_value(
                "load_shed.sample_timeout_ms",
                format!(
                    "{}ms does not outlast the {}ms CPU sampling window",
                    timeout.as_millis(),
                    window.as_millis()
                ),
            ));
        }

        if let Some(path) = self.bypass_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::invalid_value(
                "load_shed.bypass_paths",
                format!("path must start with '/': {path}"),
            ));
        }

        Ok(())
    }
}

fn default_lower_threshold() -> f64 {
    0.90
}

fn default_upper_threshold() -> f64 {
    0.95
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_bypass_paths() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string()]
}

fn default_rejection_message() -> String {
    "Service is temporarily overloaded, please retry later".to_string()
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics collection and export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus metrics endpoint address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log filter directive (trace, debug, info, warn, error, or per-target).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include ANSI color codes in output.
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Telemetry configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Service name for telemetry identification.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfigSection {
    /// Converts this section into the runtime telemetry configuration.
    #[must_use]
    pub fn to_telemetry_config(&self) -> brownout_telemetry::TelemetryConfig {
        let json = self.logging.format == LogFormat::Json;
        brownout_telemetry::TelemetryConfig {
            service_name: self.service_name.clone(),
            metrics: brownout_telemetry::MetricsConfig {
                enabled: self.metrics.enabled,
                addr: self.metrics.addr.clone(),
            },
            logging: brownout_telemetry::LogConfig {
                enabled: self.logging.enabled,
                level: self.logging.level.clone(),
                json_format: json,
                span_events: !json,
                file_line_info: self.logging.include_location,
                ansi: self.logging.ansi_enabled,
                include_target: true,
            },
        }
    }
}

fn default_service_name() -> String {
    "brownout-service".to_string()
}

fn default_true() -> bool {
    true
}
