//! Main configuration types.
//!
//! This module provides the top-level [`BrownoutConfig`] struct and its builder.

use serde::{Deserialize, Serialize};

use crate::{LoadShedConfig, LogFormat, TelemetryConfigSection};

/// Complete Brownout configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use brownout_config::BrownoutConfig;
///
/// let config = BrownoutConfig::default();
/// assert!(config.load_shed.enabled);
/// assert_eq!(config.load_shed.interval_ms, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BrownoutConfig {
    /// Load-shedding configuration.
    #[serde(default)]
    pub load_shed: LoadShedConfig,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,
}

impl BrownoutConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use brownout_config::{BrownoutConfig, LoadShedConfig};
    ///
    /// let config = BrownoutConfig::builder()
    ///     .load_shed(LoadShedConfig {
    ///         lower_threshold: 0.8,
    ///         ..Default::default()
    ///     })
    ///     .build();
    ///
    /// assert!((config.load_shed.lower_threshold - 0.8).abs() < f64::EPSILON);
    /// ```
    #[must_use]
    pub fn builder() -> BrownoutConfigBuilder {
        BrownoutConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - Thresholds are outside `[0.0, 1.0]` or `lower > upper`
    /// - The interval or sample timeout is zero
    /// - A bypass path is not absolute
    /// - The metrics address is invalid while metrics are enabled
    pub fn validate(&self) -> Result<(), crate::ConfigError> {
        self.load_shed.validate()?;

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(crate::ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// - Pretty log formatting with ANSI colors
    /// - Debug log level
    /// - Metrics export disabled
    ///
    /// # Example
    ///
    /// ```
    /// use brownout_config::{BrownoutConfig, LogFormat};
    ///
    /// let config = BrownoutConfig::development();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config.telemetry.metrics.enabled = false;
        config
    }

    /// Create a production configuration preset.
    ///
    /// - JSON log formatting
    /// - Info log level
    /// - Metrics export enabled
    /// - `Retry-After: 1` on shed responses
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.logging.level = "info".to_string();
        config.telemetry.metrics.enabled = true;
        config.load_shed.retry_after_secs = Some(1);
        config
    }
}

/// Builder for [`BrownoutConfig`].
#[derive(Debug, Clone, Default)]
pub struct BrownoutConfigBuilder {
    config: BrownoutConfig,
}

impl BrownoutConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the load-shedding configuration.
    #[must_use]
    pub fn load_shed(mut self, load_shed: LoadShedConfig) -> Self {
        self.config.load_shed = load_shed;
        self
    }

    /// Set the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfigSection) -> Self {
        self.config.telemetry = telemetry;
        self
    }

    /// Build the configuration without validation.
    #[must_use]
    pub fn build(self) -> BrownoutConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<BrownoutConfig, crate::ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
