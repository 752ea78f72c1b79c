//! # Brownout
//!
//! **CPU-load shedding middleware for async HTTP services**
//!
//! Brownout rejects a growing share of requests as system load climbs from a
//! lower to an upper threshold, so an overloaded service degrades gradually
//! instead of collapsing.
//!
//! - **Linear ramp** – Shed probability rises from 0 at the lower threshold
//!   to 1 at the upper threshold
//! - **Cached sampling** – One CPU sample per interval, shared by all requests
//! - **Fail open** – Requests are admitted when the load cannot be measured
//! - **Pluggable** – Custom metric sources, criteria, bypass rules and
//!   rejection responses
//!
//! ## Quick Start
//!
//! ```no_run
//! use brownout::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("brownout.toml")?
//!     .with_env_prefix("BROWNOUT")
//!     .load()?;
//!
//! let pipeline = Pipeline::builder()
//!     .add_pre_handler_stage(RequestIdMiddleware::new())
//!     .add_pre_handler_stage(LoadShedMiddleware::from_config(&config.load_shed)?)
//!     .build();
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! | Module        | Crate                 | Contents                               |
//! |---------------|-----------------------|----------------------------------------|
//! | [`core`]      | `brownout-core`       | Load metric, thresholds, errors        |
//! | [`middleware`]| `brownout-middleware` | Gate, metric sources, pipeline         |
//! | [`config`]    | `brownout-config`     | Layered TOML/JSON/env configuration    |
//! | [`telemetry`] | `brownout-telemetry`  | Logging and Prometheus metrics         |

#![doc(html_root_url = "https://docs.rs/brownout/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use brownout_core as core;

// Re-export middleware types
pub use brownout_middleware as middleware;

// Re-export configuration types
pub use brownout_config as config;

// Re-export telemetry types
pub use brownout_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use brownout::prelude::*;
///
/// let criterion = LinearRampCriterion::new(0.90, 0.95).unwrap();
/// assert!(!criterion.should_shed(LoadMetric::new(0.5).unwrap()));
/// ```
pub mod prelude {
    pub use brownout_core::{BuildError, LoadMetric, MetricError, RequestId, ShedError, Thresholds};

    pub use brownout_middleware::{
        Bypass, CachedMetricSource, LinearRampCriterion, LoadShedBuilder, LoadShedMiddleware,
        MetricSource, Middleware, MiddlewareContext, PathBypass, Pipeline, RejectionHandler,
        Request, RequestIdMiddleware, Response, ResponseExt, ShedCriterion, ShedDecision,
        ShedErrorExt, SystemCpuSource,
    };

    pub use brownout_config::{BrownoutConfig, ConfigError, ConfigLoader, LoadShedConfig};

    pub use brownout_telemetry::{init_telemetry, TelemetryConfig};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use brownout_middleware::fixtures::FixedSource;
    use bytes::Bytes;
    use http_body_util::Full;

    #[tokio::test]
    async fn test_prelude_builds_a_working_pipeline() {
        let config = BrownoutConfig::default();
        let load_shed = LoadShedBuilder::from_config(&config.load_shed)
            .metric_source(FixedSource::new(0.99))
            .build()
            .unwrap();

        let pipeline = Pipeline::builder()
            .add_pre_handler_stage(RequestIdMiddleware::new())
            .add_pre_handler_stage(load_shed)
            .build();

        let request = http::Request::builder()
            .uri("/orders")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = pipeline
            .process(MiddlewareContext::new(), request, |_ctx, _req| {
                Box::pin(async { Response::empty() })
            })
            .await;

        assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_paths_bypass_by_default() {
        let config = BrownoutConfig::default();
        let load_shed = LoadShedBuilder::from_config(&config.load_shed)
            .metric_source(FixedSource::new(1.0))
            .build()
            .unwrap();
        let pipeline = Pipeline::builder().add_pre_handler_stage(load_shed).build();

        let request = http::Request::builder()
            .uri("/health")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = pipeline
            .process(MiddlewareContext::new(), request, |_ctx, _req| {
                Box::pin(async { Response::empty() })
            })
            .await;

        assert_eq!(response.status(), http::StatusCode::OK);
    }
}
