//! # Brownout Middleware
//!
//! CPU-load shedding for async HTTP services.
//!
//! The [`LoadShedMiddleware`] gate samples a normalized load metric, cached
//! for one interval, and sheds requests with a probability that ramps
//! linearly from `0` at the lower threshold to `1` at the upper threshold.
//!
//! ## Pipeline
//!
//! ```text
//! Request → RequestId → LoadShed → ... → Handler
//!                          │
//!                          └─ shed → rejection handler / 503
//! ```
//!
//! ## Building Blocks
//!
//! | Type                      | Purpose                                        |
//! |---------------------------|------------------------------------------------|
//! | [`MetricSource`]          | Produces one load sample                       |
//! | [`SystemCpuSource`]       | Global CPU usage over a sampling window        |
//! | [`CachedMetricSource`]    | Single-flight cache with stale-while-revalidate |
//! | [`ShedCriterion`]         | Turns a sample into an admit/shed decision     |
//! | [`LinearRampCriterion`]   | Probabilistic ramp between two thresholds      |
//! | [`Bypass`]                | Requests that skip the gate                    |
//! | [`RejectionHandler`]      | Custom response for shed requests              |
//!
//! ## Failure Behavior
//!
//! If the load cannot be sampled, or sampling exceeds the sample timeout, the
//! gate admits the request and logs a warning.
//!
//! ## Example
//!
//! ```
//! use brownout_middleware::{Pipeline, Response, ResponseExt};
//! use brownout_middleware::context::MiddlewareContext;
//! use brownout_middleware::fixtures::FixedSource;
//! use brownout_middleware::stages::{LoadShedMiddleware, RequestIdMiddleware};
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::builder()
//!     .add_pre_handler_stage(RequestIdMiddleware::new())
//!     .add_pre_handler_stage(
//!         LoadShedMiddleware::builder()
//!             .metric_source(FixedSource::new(0.99))
//!             .build()
//!             .unwrap(),
//!     )
//!     .build();
//!
//! let request = http::Request::builder()
//!     .uri("/orders")
//!     .body(http_body_util::Full::new(bytes::Bytes::new()))
//!     .unwrap();
//!
//! let response = pipeline
//!     .process(MiddlewareContext::new(), request, |_ctx, _req| {
//!         Box::pin(async { Response::empty() })
//!     })
//!     .await;
//! assert_eq!(response.status(), http::StatusCode::SERVICE_UNAVAILABLE);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/brownout-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod criterion;
pub mod fixtures;
pub mod metric;
pub mod middleware;
pub mod pipeline;
pub mod policy;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::MiddlewareContext;
pub use criterion::{LinearRampCriterion, ShedCriterion};
pub use metric::{CachedMetricSource, MetricSource, SystemCpuSource};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use policy::{Bypass, PathBypass, RejectionHandler};
pub use stages::{LoadShedBuilder, LoadShedMiddleware, RequestIdMiddleware, ShedDecision};
pub use types::{Request, Response, ResponseExt, ShedErrorExt, RETRY_AFTER};
