//! Error types for Brownout.
//!
//! Three families of errors exist, matching the three ways the load-shedding
//! gate can fail:
//!
//! | Type | Raised by | Gate behavior |
//! |------|-----------|---------------|
//! | [`MetricError`] | A metric source | Fail open: the request is forwarded |
//! | [`ShedError`] | A rejection handler | Becomes the final response |
//! | [`BuildError`] | Builders and validators | Construction fails eagerly |
//!
//! Shedding itself is not an error; it is a policy outcome.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`ShedError`].
pub type ShedResult<T> = Result<T, ShedError>;

/// Explicit failure outcome returned by a rejection handler.
///
/// When a rejection handler returns one of these, it overrides any status or
/// body the handler already wrote to the response.
///
/// # Example
///
/// ```
/// use brownout_core::ShedError;
/// use http::StatusCode;
///
/// let err = ShedError::status(StatusCode::INTERNAL_SERVER_ERROR, "handler exploded");
/// assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
/// ```
#[derive(Error, Debug)]
pub enum ShedError {
    /// The service is shedding load.
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// Human-readable error message.
        message: String,
        /// Seconds the client should wait before retrying.
        retry_after_seconds: Option<u64>,
    },

    /// The client should slow down.
    #[error("Too many requests: {message}")]
    TooManyRequests {
        /// Human-readable error message.
        message: String,
        /// Seconds the client should wait before retrying.
        retry_after_seconds: Option<u64>,
    },

    /// The rejection handler itself failed.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// An arbitrary status chosen by the handler.
    #[error("{message}")]
    Status {
        /// Status code of the final response.
        status: StatusCode,
        /// Human-readable error message.
        message: String,
    },
}

impl ShedError {
    /// Creates a service unavailable error.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    /// Creates a too-many-requests error.
    #[must_use]
    pub fn too_many_requests(message: impl Into<String>, retry_after_seconds: Option<u64>) -> Self {
        Self::TooManyRequests {
            message: message.into(),
            retry_after_seconds,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an error with an explicit status code.
    #[must_use]
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Sets the retry hint on retryable variants. Other variants are unchanged.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        match &mut self {
            Self::ServiceUnavailable {
                retry_after_seconds,
                ..
            }
            | Self::TooManyRequests {
                retry_after_seconds,
                ..
            } => *retry_after_seconds = Some(seconds),
            Self::Internal { .. } | Self::Status { .. } => {}
        }
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Status { status, .. } => *status,
        }
    }

    /// Returns the retry hint, if any.
    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::ServiceUnavailable {
                retry_after_seconds,
                ..
            }
            | Self::TooManyRequests {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            Self::Internal { .. } | Self::Status { .. } => None,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> String {
        code_for_status(self.status_code())
    }

    /// Returns the client-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ServiceUnavailable { message, .. }
            | Self::TooManyRequests { message, .. }
            | Self::Internal { message, .. }
            | Self::Status { message, .. } => message,
        }
    }

    /// Converts this error to a serializable error envelope.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        let details = self
            .retry_after_seconds()
            .map(|seconds| serde_json::json!({ "retry_after_seconds": seconds }));

        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.message().to_string(),
                request_id: request_id.map(ToString::to_string),
                details,
            },
        }
    }
}

/// Maps a status code to the machine-readable code used in envelopes.
fn code_for_status(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "BAD_REQUEST".to_string(),
        403 => "FORBIDDEN".to_string(),
        408 => "REQUEST_TIMEOUT".to_string(),
        429 => "RATE_LIMITED".to_string(),
        500 => "INTERNAL_ERROR".to_string(),
        502 => "BAD_GATEWAY".to_string(),
        503 => "SERVICE_UNAVAILABLE".to_string(),
        504 => "GATEWAY_TIMEOUT".to_string(),
        other => format!("HTTP_{other}"),
    }
}

/// Serializable error envelope for HTTP responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// The request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Additional error details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Failure to obtain a load measurement.
///
/// The gate never rejects a request because of one of these.
#[derive(Error, Debug)]
pub enum MetricError {
    /// The underlying OS query failed.
    #[error("load metric unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Load sampling is not supported on this platform.
    #[error("load sampling is not supported on this platform")]
    Unsupported,

    /// The source produced a value that is not a valid load.
    #[error("load metric out of range: {value}")]
    OutOfRange {
        /// The rejected raw value.
        value: f64,
    },

    /// The sample did not complete in time.
    #[error("load sampling timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl MetricError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an unavailable error with a source error.
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns a short label for metrics and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Unsupported => "unsupported",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Invalid load-shedding settings, reported at construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// A threshold is outside `[0.0, 1.0]` or NaN.
    #[error("{field} must be within [0.0, 1.0], got {value}")]
    ThresholdOutOfRange {
        /// Name of the offending setting.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The lower threshold is above the upper threshold.
    #[error("lower threshold {lower} exceeds upper threshold {upper}")]
    InvertedThresholds {
        /// The lower threshold.
        lower: f64,
        /// The upper threshold.
        upper: f64,
    },

    /// A duration setting is zero.
    #[error("{field} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending setting.
        field: &'static str,
    },

    /// The sample timeout expires before a CPU sample can complete.
    #[error("sample_timeout {timeout:?} must exceed the CPU sampling window {window:?}")]
    SampleTimeoutTooShort {
        /// The configured sample timeout.
        timeout: Duration,
        /// The sampling window the CPU source would use.
        window: Duration,
    },
}

impl BuildError {
    /// Returns the name of the setting that failed validation.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::ThresholdOutOfRange { field, .. } | Self::ZeroDuration { field } => field,
            Self::InvertedThresholds { .. } => "lower_threshold",
            Self::SampleTimeoutTooShort { .. } => "sample_timeout",
        }
    }
}
