//! Typed configuration for Brownout.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! [`BrownoutConfig`] holds two sections:
//!
//! - [`LoadShedConfig`] - Thresholds, sampling interval, bypass paths and the
//!   default rejection response
//! - [`TelemetryConfigSection`] - Logging and metrics export
//!
//! # Example
//!
//! ```no_run
//! use brownout_config::ConfigLoader;
//!
//! # fn main() -> Result<(), brownout_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("brownout.toml")?
//!     .with_env_prefix("BROWNOUT")
//!     .load()?;
//!
//! println!("Shedding between {} and {}", config.load_shed.lower_threshold, config.load_shed.upper_threshold);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [load_shed]
//! enabled = true
//! lower_threshold = 0.90
//! upper_threshold = 0.95
//! interval_ms = 1000
//! sample_timeout_ms = 2000
//! bypass_paths = ["/health", "/ready"]
//! retry_after_secs = 1
//! rejection_message = "Service is temporarily overloaded, please retry later"
//!
//! [telemetry]
//! service_name = "my-service"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [telemetry.logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with variables of the form `PREFIX__SECTION__KEY`:
//!
//! - `BROWNOUT__LOAD_SHED__LOWER_THRESHOLD=0.85`
//! - `BROWNOUT__LOAD_SHED__BYPASS_PATHS=/healthz,/metrics`
//! - `BROWNOUT__TELEMETRY__LOGGING__FORMAT=pretty`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrownoutConfig::default();
        assert!(config.load_shed.enabled);
        assert_eq!(config.load_shed.bypass_paths, vec!["/health", "/ready"]);
    }

    #[test]
    fn test_thresholds_from_config() {
        let thresholds = LoadShedConfig::default().thresholds().unwrap();
        assert!((thresholds.lower() - 0.90).abs() < f64::EPSILON);
        assert!((thresholds.upper() - 0.95).abs() < f64::EPSILON);
    }
}
