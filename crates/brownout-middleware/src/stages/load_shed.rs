//! Load-shedding middleware.
//!
//! Rejects a share of incoming requests while the system is overloaded so the
//! requests it does admit can still complete.
//!
//! ## Decision Flow
//!
//! ```text
//! request ─▶ bypass? ──yes──────────────────────────────▶ next
//!               │no
//!               ▼
//!         sample load ──error/timeout (fail open)──────▶ next
//!               │
//!               ▼
//!         criterion ──admit─────────────────────────────▶ next
//!               │shed
//!               ▼
//!      rejection handler / default 503
//! ```
//!
//! Every request gets a [`ShedDecision`] in its context, so later stages, the
//! rejection handler, and tests can see what happened.
//!
//! ## Rejection Handlers
//!
//! A rejection handler starts from an empty `200 OK` response. If it returns
//! `Ok(())`, the response it wrote is sent. If it returns an error, the
//! error's response is sent instead, even if the handler already wrote one.
//!
//! ## Example
//!
//! ```
//! use brownout_middleware::stages::LoadShedMiddleware;
//! use brownout_middleware::fixtures::FixedSource;
//! use std::time::Duration;
//!
//! let load_shed = LoadShedMiddleware::builder()
//!     .lower_threshold(0.90)
//!     .upper_threshold(0.95)
//!     .interval(Duration::from_secs(1))
//!     .metric_source(FixedSource::new(0.5))
//!     .bypass_paths(["/health"])
//!     .retry_after(1)
//!     .build()
//!     .unwrap();
//! ```

use crate::context::MiddlewareContext;
use crate::criterion::{LinearRampCriterion, ShedCriterion};
use crate::metric::{CachedMetricSource, MetricSource, SystemCpuSource};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::policy::{Bypass, PathBypass, RejectionHandler};
use crate::types::{Request, Response, ResponseExt, ShedErrorExt};
use brownout_config::LoadShedConfig;
use brownout_core::{
    cpu_sample_window, default_cpu_sample_timeout, BuildError, LoadMetric, MetricError, ShedError,
    Thresholds,
};
use brownout_telemetry::metrics::{record_decision, record_rejection_handler_error};
use std::sync::Arc;
use std::time::Duration;

/// Default lower threshold.
pub const DEFAULT_LOWER_THRESHOLD: f64 = 0.90;

/// Default upper threshold.
pub const DEFAULT_UPPER_THRESHOLD: f64 = 0.95;

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default message in the 503 body.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Service is temporarily overloaded, please retry later";

/// What the gate did with a request.
///
/// Stored in the [`MiddlewareContext`] as an extension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShedDecision {
    /// The load was sampled and the request admitted.
    Admitted {
        /// The sampled load.
        metric: LoadMetric,
    },
    /// The load was sampled and the request shed.
    Shed {
        /// The sampled load.
        metric: LoadMetric,
    },
    /// The request matched the bypass predicate. No sample was taken.
    Bypassed,
    /// Sampling failed or timed out and the request was admitted.
    FailedOpen,
}

impl ShedDecision {
    /// Label used in logs and the decisions counter.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::Shed { .. } => "shed",
            Self::Bypassed => "bypassed",
            Self::FailedOpen => "failed_open",
        }
    }

    /// Returns true if the request was rejected.
    #[must_use]
    pub const fn is_shed(&self) -> bool {
        matches!(self, Self::Shed { .. })
    }

    /// Returns the load the decision was based on, if one was sampled.
    #[must_use]
    pub const fn metric(&self) -> Option<LoadMetric> {
        match self {
            Self::Admitted { metric } | Self::Shed { metric } => Some(*metric),
            Self::Bypassed | Self::FailedOpen => None,
        }
    }
}

/// Middleware that sheds requests while the system load is high.
///
/// Cloning is cheap and clones share the metric cache.
#[derive(Clone)]
pub struct LoadShedMiddleware {
    enabled: bool,
    thresholds: Thresholds,
    source: CachedMetricSource<Arc<dyn MetricSource>>,
    sample_timeout: Duration,
    criterion: Arc<dyn ShedCriterion>,
    bypass: Option<Arc<dyn Bypass>>,
    rejection_handler: Option<Arc<dyn RejectionHandler>>,
    retry_after: Option<u64>,
    rejection_message: String,
}

impl std::fmt::Debug for LoadShedMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadShedMiddleware")
            .field("enabled", &self.enabled)
            .field("thresholds", &self.thresholds)
            .field("source", &self.source)
            .field("sample_timeout", &self.sample_timeout)
            .field("bypass", &self.bypass.is_some())
            .field("rejection_handler", &self.rejection_handler.is_some())
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

impl LoadShedMiddleware {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn builder() -> LoadShedBuilder {
        LoadShedBuilder::new()
    }

    /// Builds the middleware from a configuration section, sampling system
    /// CPU usage.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the thresholds or durations are invalid.
    pub fn from_config(config: &LoadShedConfig) -> Result<Self, BuildError> {
        LoadShedBuilder::from_config(config).build()
    }

    /// Returns true if the gate is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the configured thresholds.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Returns the shared metric cache.
    #[must_use]
    pub fn metric_cache(&self) -> &CachedMetricSource<Arc<dyn MetricSource>> {
        &self.source
    }

    /// Refreshes the load sample on a timer so requests never wait for one.
    ///
    /// Abort the returned handle to stop refreshing.
    pub fn spawn_refresher(&self) -> tokio::task::JoinHandle<()> {
        self.source.spawn_refresher()
    }

    async fn sample(&self, ctx: &MiddlewareContext) -> Option<LoadMetric> {
        // Failures are counted by the cache, once per refresh.
        let result = tokio::time::timeout(self.sample_timeout, self.source.sample())
            .await
            .unwrap_or(Err(MetricError::Timeout {
                timeout: self.sample_timeout,
            }));

        match result {
            Ok(metric) => Some(metric),
            Err(err) => {
                tracing::warn!(
                    request_id = %ctx.request_id(),
                    error = %err,
                    "Load metric unavailable, admitting request"
                );
                None
            }
        }
    }

    fn reject(&self, ctx: &MiddlewareContext, request: &Request) -> Response {
        let request_id = ctx.request_id().to_string();

        let Some(handler) = &self.rejection_handler else {
            return self.default_rejection().into_response(Some(&request_id));
        };

        let mut response = Response::empty();
        match handler.on_shed(ctx, request, &mut response) {
            Ok(()) => response,
            Err(err) => {
                let status = err.status_code().as_u16();
                tracing::error!(
                    request_id = %request_id,
                    status,
                    error = %err,
                    "Rejection handler failed"
                );
                record_rejection_handler_error(status);
                err.into_response(Some(&request_id))
            }
        }
    }

    fn default_rejection(&self) -> ShedError {
        let err = ShedError::service_unavailable(self.rejection_message.clone());
        match self.retry_after {
            Some(seconds) => err.with_retry_after(seconds),
            None => err,
        }
    }
}

fn record(ctx: &mut MiddlewareContext, decision: ShedDecision) {
    record_decision(decision.outcome());
    ctx.set_extension(decision);
}

impl Middleware for LoadShedMiddleware {
    fn name(&self) -> &'static str {
        "load_shed"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.enabled {
                return next.run(ctx, request).await;
            }

            if self
                .bypass
                .as_ref()
                .is_some_and(|bypass| bypass.should_bypass(ctx, &request))
            {
                record(ctx, ShedDecision::Bypassed);
                return next.run(ctx, request).await;
            }

            let Some(metric) = self.sample(ctx).await else {
                record(ctx, ShedDecision::FailedOpen);
                return next.run(ctx, request).await;
            };

            if !self.criterion.should_shed(metric) {
                record(ctx, ShedDecision::Admitted { metric });
                return next.run(ctx, request).await;
            }

            record(ctx, ShedDecision::Shed { metric });
            tracing::debug!(
                request_id = %ctx.request_id(),
                metric = %metric,
                path = %request.uri().path(),
                "Request shed"
            );
            self.reject(ctx, &request)
        })
    }
}

/// Builder for [`LoadShedMiddleware`].
///
/// Thresholds and durations are validated by [`build`](Self::build).
pub struct LoadShedBuilder {
    enabled: bool,
    lower_threshold: f64,
    upper_threshold: f64,
    interval: Duration,
    sample_timeout: Option<Duration>,
    source: Option<Arc<dyn MetricSource>>,
    criterion: Option<Arc<dyn ShedCriterion>>,
    bypass: Option<Arc<dyn Bypass>>,
    rejection_handler: Option<Arc<dyn RejectionHandler>>,
    retry_after: Option<u64>,
    rejection_message: String,
}

impl std::fmt::Debug for LoadShedBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadShedBuilder")
            .field("enabled", &self.enabled)
            .field("lower_threshold", &self.lower_threshold)
            .field("upper_threshold", &self.upper_threshold)
            .field("interval", &self.interval)
            .field("sample_timeout", &self.sample_timeout)
            .field("source", &self.source.is_some())
            .field("criterion", &self.criterion.is_some())
            .field("bypass", &self.bypass.is_some())
            .field("rejection_handler", &self.rejection_handler.is_some())
            .field("retry_after", &self.retry_after)
            .field("rejection_message", &self.rejection_message)
            .finish()
    }
}

impl Default for LoadShedBuilder {
    fn default() -> Self {
        Self {
            enabled: true,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            interval: DEFAULT_INTERVAL,
            sample_timeout: None,
            source: None,
            criterion: None,
            bypass: None,
            rejection_handler: None,
            retry_after: None,
            rejection_message: DEFAULT_REJECTION_MESSAGE.to_string(),
        }
    }
}

impl LoadShedBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from a configuration section.
    ///
    /// Settings not covered by the section (metric source, criterion, custom
    /// handlers) can still be set afterwards.
    #[must_use]
    pub fn from_config(config: &LoadShedConfig) -> Self {
        let mut builder = Self::new()
            .enabled(config.enabled)
            .lower_threshold(config.lower_threshold)
            .upper_threshold(config.upper_threshold)
            .interval(config.interval())
            .sample_timeout(config.sample_timeout())
            .rejection_message(config.rejection_message.clone());

        if !config.bypass_paths.is_empty() {
            builder = builder.bypass_paths(config.bypass_paths.iter().cloned());
        }
        if let Some(seconds) = config.retry_after_secs {
            builder = builder.retry_after(seconds);
        }
        builder
    }

    /// Enables or disables the gate. A disabled gate forwards every request
    /// untouched.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Load below which requests are always admitted.
    ///
    /// Default: 0.90.
    #[must_use]
    pub fn lower_threshold(mut self, lower: f64) -> Self {
        self.lower_threshold = lower;
        self
    }

    /// Load above which requests are always shed.
    ///
    /// Default: 0.95.
    #[must_use]
    pub fn upper_threshold(mut self, upper: f64) -> Self {
        self.upper_threshold = upper;
        self
    }

    /// How long one load sample is reused.
    ///
    /// Default: 1 second.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Upper bound on a single load sample.
    ///
    /// Default: twice the interval. When sampling system CPU usage, at least
    /// twice [`MIN_CPU_SAMPLE_WINDOW`](brownout_core::MIN_CPU_SAMPLE_WINDOW).
    #[must_use]
    pub fn sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = Some(timeout);
        self
    }

    /// Samples load from `source` instead of system CPU usage.
    #[must_use]
    pub fn metric_source<S: MetricSource>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Replaces the linear ramp between the thresholds.
    ///
    /// The thresholds are still validated.
    #[must_use]
    pub fn criterion<C: ShedCriterion>(mut self, criterion: C) -> Self {
        self.criterion = Some(Arc::new(criterion));
        self
    }

    /// Skips the gate for requests matching `predicate`.
    ///
    /// Replaces any earlier bypass.
    #[must_use]
    pub fn bypass<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&MiddlewareContext, &Request) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Arc::new(predicate));
        self
    }

    /// Skips the gate for requests matching a [`Bypass`] implementation.
    #[must_use]
    pub fn bypass_with<B: Bypass>(mut self, bypass: B) -> Self {
        self.bypass = Some(Arc::new(bypass));
        self
    }

    /// Skips the gate for the given path prefixes.
    #[must_use]
    pub fn bypass_paths<I, P>(self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.bypass_with(PathBypass::new(prefixes))
    }

    /// Shapes the response for shed requests with a closure.
    ///
    /// # Example
    ///
    /// ```
    /// use brownout_core::ShedError;
    /// use brownout_middleware::stages::LoadShedMiddleware;
    /// use brownout_middleware::fixtures::FixedSource;
    ///
    /// let load_shed = LoadShedMiddleware::builder()
    ///     .metric_source(FixedSource::new(0.99))
    ///     .on_shed(|_ctx, _req, res| {
    ///         *res.status_mut() = http::StatusCode::TOO_MANY_REQUESTS;
    ///         Ok(())
    ///     })
    ///     .build()
    ///     .unwrap();
    /// ```
    #[must_use]
    pub fn on_shed<F>(mut self, handler: F) -> Self
    where
        F: Fn(&MiddlewareContext, &Request, &mut Response) -> Result<(), ShedError>
            + Send
            + Sync
            + 'static,
    {
        self.rejection_handler = Some(Arc::new(handler));
        self
    }

    /// Shapes the response for shed requests with a [`RejectionHandler`].
    #[must_use]
    pub fn rejection_handler<H: RejectionHandler>(mut self, handler: H) -> Self {
        self.rejection_handler = Some(Arc::new(handler));
        self
    }

    /// Adds a `Retry-After` header to the default 503 response.
    #[must_use]
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Sets the message in the default 503 response.
    #[must_use]
    pub fn rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// Validates the settings and builds the middleware.
    ///
    /// Without a custom metric source the gate samples system CPU usage. The
    /// sample timeout then defaults to [`default_cpu_sample_timeout`] and
    /// must outlast the CPU sampling window.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if a threshold is outside `[0.0, 1.0]`, the
    /// thresholds are inverted, the interval or sample timeout is zero, or
    /// the sample timeout cannot fit a CPU sample.
    pub fn build(self) -> Result<LoadShedMiddleware, BuildError> {
        let thresholds = Thresholds::new(self.lower_threshold, self.upper_threshold)?;
        if self.interval.is_zero() {
            return Err(BuildError::ZeroDuration { field: "interval" });
        }
        if self.sample_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BuildError::ZeroDuration {
                field: "sample_timeout",
            });
        }

        let (source, sample_timeout) = match self.source {
            Some(source) => {
                let timeout = self
                    .sample_timeout
                    .unwrap_or_else(|| self.interval.saturating_mul(2));
                (source, timeout)
            }
            None => {
                let timeout = self
                    .sample_timeout
                    .unwrap_or_else(|| default_cpu_sample_timeout(self.interval));
                let window = cpu_sample_window(self.interval, timeout);
                if timeout <= window {
                    return Err(BuildError::SampleTimeoutTooShort { timeout, window });
                }
                let source: Arc<dyn MetricSource> = Arc::new(SystemCpuSource::new(window));
                (source, timeout)
            }
        };
        let source = CachedMetricSource::with_timeout(source, self.interval, sample_timeout)?;

        let criterion = self
            .criterion
            .unwrap_or_else(|| Arc::new(LinearRampCriterion::from_thresholds(thresholds)));

        Ok(LoadShedMiddleware {
            enabled: self.enabled,
            thresholds,
            source,
            sample_timeout,
            criterion,
            bypass: self.bypass,
            rejection_handler: self.rejection_handler,
            retry_after: self.retry_after,
            rejection_message: self.rejection_message,
        })
    }
}
