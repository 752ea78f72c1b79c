//! Metric source fixtures for tests.
//!
//! These sources make the gate deterministic: a fixed load, a source that
//! always fails, one that never answers, a scripted sequence, and a wrapper
//! that counts how often it was sampled.
//!
//! # Example
//!
//! ```
//! use brownout_middleware::fixtures::{CountingSource, FixedSource};
//! use brownout_middleware::MetricSource;
//!
//! # tokio_test::block_on(async {
//! let source = CountingSource::new(FixedSource::new(0.93));
//! let metric = source.sample().await.unwrap();
//!
//! assert!((metric.value() - 0.93).abs() < f64::EPSILON);
//! assert_eq!(source.calls(), 1);
//! # });
//! ```

use crate::metric::MetricSource;
use crate::middleware::BoxFuture;
use brownout_core::{LoadMetric, MetricError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always reports the same load.
#[derive(Debug, Clone, Copy)]
pub struct FixedSource {
    value: f64,
}

impl FixedSource {
    /// Creates a source reporting `value`.
    ///
    /// The value goes through [`LoadMetric::new`] on every sample, so a
    /// non-finite value makes every sample fail.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self { value }
    }
}

impl MetricSource for FixedSource {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        let value = self.value;
        Box::pin(async move { LoadMetric::new(value) })
    }
}

/// Always fails with [`MetricError::Unavailable`].
#[derive(Debug, Clone)]
pub struct FailingSource {
    message: String,
}

impl FailingSource {
    /// Creates a source failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl MetricSource for FailingSource {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        Box::pin(async move { Err(MetricError::unavailable(self.message.clone())) })
    }
}

/// Never completes a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct HangingSource;

impl MetricSource for HangingSource {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        Box::pin(std::future::pending())
    }
}

#[derive(Debug, Clone)]
enum Step {
    Value(f64),
    Fail(String),
}

/// Replays a scripted sequence of samples, repeating the last step forever.
///
/// An empty sequence fails every sample.
#[derive(Debug, Clone)]
pub struct SequenceSource {
    steps: Arc<Mutex<VecDeque<Step>>>,
}

impl SequenceSource {
    /// Creates a sequence of successful samples.
    #[must_use]
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(values.into_iter().map(Step::Value).collect())),
        }
    }

    /// Appends a successful sample.
    #[must_use]
    pub fn then(self, value: f64) -> Self {
        self.steps.lock().push_back(Step::Value(value));
        self
    }

    /// Appends a failing sample.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.steps.lock().push_back(Step::Fail(message.into()));
        self
    }

    fn next_step(&self) -> Option<Step> {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

impl MetricSource for SequenceSource {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        let step = self.next_step();
        Box::pin(async move {
            match step {
                Some(Step::Value(value)) => LoadMetric::new(value),
                Some(Step::Fail(message)) => Err(MetricError::unavailable(message)),
                None => Err(MetricError::unavailable("sequence is empty")),
            }
        })
    }
}

/// Counts samples taken from an inner source, optionally after a delay.
///
/// Clones share the counter, so a test can keep one clone and hand the other
/// to the gate.
#[derive(Debug, Clone)]
pub struct CountingSource<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl<S: MetricSource> CountingSource<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Sleeps for `delay` before each sample.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of samples started so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<S: MetricSource> MetricSource for CountingSource<S> {
    fn sample(&self) -> BoxFuture<'_, Result<LoadMetric, MetricError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.sample().await
        })
    }
}
