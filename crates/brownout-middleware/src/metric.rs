//! Load metric sources.
//!
//! A [`MetricSource`] produces one normalized load sample per call. Sampling
//! CPU usage takes a full sampling window, so the gate never calls a raw
//! source directly: it goes through [`CachedMetricSource`], which keeps the
//! last sample for one interval and refreshes it in the background.
//!
//! # Cache states
//!
//! ```text
//! empty ──ok──▶ fresh ──interval elapses──▶ stale ──ok──▶ fresh
//!   │                                         │
//!   └──fail──▶ failed ◀─────────fail──────────┘
//!                │
//!                └──interval elapses, retry ok──▶ fresh
//! ```
//!
//! - **fresh**: callers read the snapshot without locking.
//! - **stale**: callers get the stale value immediately; the first of them
//!   starts a single background refresh.
//! - **empty**: before the first refresh, or after [`invalidate`], callers
//!   wait for the single in-flight refresh. This is the only waiting state.
//!
//! [`invalidate`]: CachedMetricSource::invalidate
//! - **failed**: a failed refresh drops the value and records the failure.
//!   Callers get the failure immediately instead of an ever older value.
//!   Once the failure is an interval old, the first caller starts a single
//!   background retry.

use crate::middleware::BoxFuture;
use arc_swap::ArcSwapOption;
use brownout_core::{BuildError, LoadMetric, MetricError, MIN_CPU_SAMPLE_WINDOW};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A provider of normalized load samples.
///
/// Implementations must surface failures as [`MetricError`] rather than
/// substituting a default value.
///
/// # Example
///
/// ```
/// use brownout_core::{LoadMetric, MetricError};
/// use brownout_middleware::{BoxFuture, MetricSource};
///
/// struct QueueDepth;
///
/// impl MetricSource for QueueDepth {
///     fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
///         Box::pin(async { LoadMetric::new(0.25) })
///     }
/// }
/// ```
pub trait MetricSource: Send + Sync + 'static {
    /// Takes one load sample.
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>>;
}

impl<S: MetricSource + ?Sized> MetricSource for Arc<S> {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        (**self).sample()
    }
}

impl<S: MetricSource + ?Sized> MetricSource for Box<S> {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        (**self).sample()
    }
}

/// Global CPU utilization, averaged across all cores over a sampling window.
///
/// Each sample refreshes the CPU counters, sleeps for the window, refreshes
/// again and reports the busy fraction between the two refreshes. Concurrent
/// samples share counters and skew each other; wrap the source in a
/// [`CachedMetricSource`] so only one sample runs at a time.
#[derive(Debug, Clone)]
pub struct SystemCpuSource {
    system: Arc<Mutex<System>>,
    window: Duration,
}

impl SystemCpuSource {
    /// Creates a CPU source with the given sampling window.
    ///
    /// Windows shorter than [`MIN_CPU_SAMPLE_WINDOW`] are raised to that
    /// minimum when sampling.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            window,
        }
    }

    /// Returns the configured sampling window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns how long one sample actually takes.
    #[must_use]
    pub fn effective_window(&self) -> Duration {
        self.window
            .max(MIN_CPU_SAMPLE_WINDOW)
            .max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
    }
}

impl MetricSource for SystemCpuSource {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        Box::pin(async move {
            if !sysinfo::IS_SUPPORTED_SYSTEM {
                return Err(MetricError::Unsupported);
            }

            self.system.lock().refresh_cpu();
            tokio::time::sleep(self.effective_window()).await;

            let usage = {
                let mut system = self.system.lock();
                system.refresh_cpu();
                system.global_cpu_info().cpu_usage()
            };

            LoadMetric::from_percent(f64::from(usage))
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    value: LoadMetric,
    taken_at: Instant,
}

#[derive(Debug)]
struct Failure {
    error: MetricError,
    failed_at: Instant,
}

struct CacheInner<S> {
    source: S,
    interval: Duration,
    refresh_timeout: Duration,
    snapshot: ArcSwapOption<Snapshot>,
    refreshing: AtomicBool,
    refreshed: Notify,
    failure: ArcSwapOption<Failure>,
}

impl<S: MetricSource> CacheInner<S> {
    async fn refresh(&self) {
        match tokio::time::timeout(self.refresh_timeout, self.source.sample()).await {
            Ok(Ok(value)) => {
                self.snapshot.store(Some(Arc::new(Snapshot {
                    value,
                    taken_at: Instant::now(),
                })));
                self.failure.store(None);
                brownout_telemetry::metrics::record_load(value.value());
                tracing::trace!(metric = %value, "Load sample refreshed");
            }
            Ok(Err(err)) => self.fail(err),
            Err(_) => self.fail(MetricError::Timeout {
                timeout: self.refresh_timeout,
            }),
        }
    }

    fn fail(&self, err: MetricError) {
        tracing::warn!(error = %err, reason = err.reason(), "Load sample failed");
        brownout_telemetry::metrics::record_metric_failure(err.reason());
        // Failure first, so readers always see one of the two.
        self.failure.store(Some(Arc::new(Failure {
            error: err,
            failed_at: Instant::now(),
        })));
        self.snapshot.store(None);
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        snapshot.taken_at.elapsed() < self.interval
    }

    fn is_retry_due(&self, failure: &Failure) -> bool {
        failure.failed_at.elapsed() >= self.interval
    }
}

/// Clears the in-flight flag and wakes waiters, even if the refresh future is
/// dropped before completing.
struct RefreshGuard<S: MetricSource>(Arc<CacheInner<S>>);

impl<S: MetricSource> Drop for RefreshGuard<S> {
    fn drop(&mut self) {
        self.0.refreshing.store(false, Ordering::Release);
        self.0.refreshed.notify_waiters();
    }
}

/// Caches the samples of another [`MetricSource`] for one interval.
///
/// The read path is a lock-free snapshot load. At most one refresh runs at a
/// time, on a spawned task, so a caller that gives up waiting does not cancel
/// it. Cloning is cheap and clones share the cache.
///
/// Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```
/// use brownout_middleware::{CachedMetricSource, MetricSource};
/// use brownout_middleware::fixtures::FixedSource;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let cache = CachedMetricSource::new(FixedSource::new(0.4), Duration::from_secs(1)).unwrap();
/// let metric = cache.sample().await.unwrap();
/// assert!((metric.value() - 0.4).abs() < f64::EPSILON);
/// assert!(cache.is_fresh());
/// # });
/// ```
pub struct CachedMetricSource<S: MetricSource> {
    inner: Arc<CacheInner<S>>,
}

impl<S: MetricSource> Clone for CachedMetricSource<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MetricSource> std::fmt::Debug for CachedMetricSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMetricSource")
            .field("interval", &self.inner.interval)
            .field("refresh_timeout", &self.inner.refresh_timeout)
            .field("cached", &self.cached())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl<S: MetricSource> CachedMetricSource<S> {
    /// Wraps `source`, caching each sample for `interval`.
    ///
    /// A single refresh may take up to twice the interval.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroDuration`] if `interval` is zero.
    pub fn new(source: S, interval: Duration) -> Result<Self, BuildError> {
        Self::with_timeout(source, interval, interval.saturating_mul(2))
    }

    /// Wraps `source` with an explicit upper bound on a single refresh.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ZeroDuration`] if either duration is zero.
    pub fn with_timeout(
        source: S,
        interval: Duration,
        refresh_timeout: Duration,
    ) -> Result<Self, BuildError> {
        if interval.is_zero() {
            return Err(BuildError::ZeroDuration { field: "interval" });
        }
        if refresh_timeout.is_zero() {
            return Err(BuildError::ZeroDuration {
                field: "sample_timeout",
            });
        }

        Ok(Self {
            inner: Arc::new(CacheInner {
                source,
                interval,
                refresh_timeout,
                snapshot: ArcSwapOption::empty(),
                refreshing: AtomicBool::new(false),
                refreshed: Notify::new(),
                failure: ArcSwapOption::empty(),
            }),
        })
    }

    /// Returns the cache lifetime of one sample.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Returns the upper bound on a single refresh.
    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        self.inner.refresh_timeout
    }

    /// Returns the cached value regardless of age.
    #[must_use]
    pub fn cached(&self) -> Option<LoadMetric> {
        self.inner.snapshot.load_full().map(|s| s.value)
    }

    /// Returns true if a value is cached and younger than the interval.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.inner
            .snapshot
            .load_full()
            .is_some_and(|s| self.inner.is_fresh(&s))
    }

    /// Returns true while a refresh is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Returns the error of the last refresh, if it failed.
    #[must_use]
    pub fn last_error(&self) -> Option<MetricError> {
        self.inner
            .failure
            .load_full()
            .map(|failure| replicate(&failure.error))
    }

    /// Drops the cached value and any recorded failure so the next call
    /// samples again.
    pub fn invalidate(&self) {
        self.inner.snapshot.store(None);
        self.inner.failure.store(None);
    }

    /// Forces a refresh and waits for its result.
    ///
    /// If a refresh is already running, waits for that one instead.
    pub async fn refresh_now(&self) -> Result<LoadMetric, MetricError> {
        let notified = self.inner.refreshed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        self.try_spawn_refresh();
        notified.await;

        self.after_refresh()
    }

    /// Spawns a task that refreshes the cache once per interval, so requests
    /// almost always find a fresh value.
    ///
    /// Abort the returned handle to stop it.
    pub fn spawn_refresher(&self) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.inner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = cache.refresh_now().await;
            }
        })
    }

    /// Starts a background refresh unless one is already running.
    ///
    /// Returns true if this call started it.
    fn try_spawn_refresh(&self) -> bool {
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Built before spawning so an unpolled task still releases the flag.
        let guard = RefreshGuard(Arc::clone(&self.inner));
        tokio::spawn(async move {
            guard.0.refresh().await;
            drop(guard);
        });
        true
    }

    fn after_refresh(&self) -> Result<LoadMetric, MetricError> {
        if let Some(snapshot) = self.inner.snapshot.load_full() {
            return Ok(snapshot.value);
        }

        Err(self
            .last_error()
            .unwrap_or_else(|| MetricError::unavailable("load sample refresh did not complete")))
    }

    /// Answers from the cache without waiting, starting a background refresh
    /// when the value is stale or a retry is due.
    ///
    /// Returns `None` only for a cold cache.
    fn peek(&self) -> Option<Result<LoadMetric, MetricError>> {
        if let Some(snapshot) = self.inner.snapshot.load_full() {
            if !self.inner.is_fresh(&snapshot) {
                self.try_spawn_refresh();
            }
            return Some(Ok(snapshot.value));
        }

        let failure = self.inner.failure.load_full()?;
        if self.inner.is_retry_due(&failure) {
            self.try_spawn_refresh();
        }
        Some(Err(replicate(&failure.error)))
    }

    async fn sample_cached(&self) -> Result<LoadMetric, MetricError> {
        if let Some(result) = self.peek() {
            return result;
        }

        let notified = self.inner.refreshed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        // A refresh may have landed between the first peek and enable().
        if let Some(result) = self.peek() {
            return result;
        }

        self.try_spawn_refresh();
        notified.await;

        self.after_refresh()
    }
}

/// Copies an error for another waiter. Opaque sources are not shared.
fn replicate(err: &MetricError) -> MetricError {
    match err {
        MetricError::Unavailable { message, .. } => MetricError::unavailable(message.clone()),
        MetricError::Unsupported => MetricError::Unsupported,
        MetricError::OutOfRange { value } => MetricError::OutOfRange { value: *value },
        MetricError::Timeout { timeout } => MetricError::Timeout { timeout: *timeout },
    }
}

impl<S: MetricSource> MetricSource for CachedMetricSource<S> {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        Box::pin(self.sample_cached())
    }
}
