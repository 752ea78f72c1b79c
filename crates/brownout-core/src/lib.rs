//! # Brownout Core
//!
//! Core types shared by the Brownout load-shedding crates.
//!
//! - [`LoadMetric`] - Normalized system load in `[0, 1]`
//! - [`Thresholds`] - Validated lower/upper shedding thresholds
//! - [`RequestId`] - UUID v7 request identifier
//! - [`ShedError`] - Outcome errors returned by rejection handlers
//! - [`MetricError`] - Failures of a load metric source
//! - [`BuildError`] - Eager validation failures for thresholds and intervals
//! - [`cpu_sample_window`] - How long one CPU sample takes for given settings

#![doc(html_root_url = "https://docs.rs/brownout-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod load;
mod request_id;

pub use error::{
    BuildError, ErrorDetail, ErrorEnvelope, MetricError, ShedError, ShedResult,
};
pub use load::{
    cpu_sample_window, default_cpu_sample_timeout, LoadMetric, Thresholds, MIN_CPU_SAMPLE_WINDOW,
};
pub use request_id::RequestId;
