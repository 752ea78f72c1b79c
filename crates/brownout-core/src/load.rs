//! Normalized load measurements.

use crate::error::{BuildError, MetricError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest window over which CPU usage can be measured.
///
/// CPU counters refreshed closer together than this do not report a usable
/// busy fraction, so CPU sources stretch shorter windows to this length.
pub const MIN_CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(200);

/// Sampling window of a CPU source for the given interval and sample timeout.
///
/// The window is the interval, shrunk to fit in half the timeout, then
/// stretched to at least [`MIN_CPU_SAMPLE_WINDOW`]. A CPU sample only
/// completes if the timeout is longer than this window.
///
/// # Example
///
/// ```
/// use brownout_core::{cpu_sample_window, MIN_CPU_SAMPLE_WINDOW};
/// use std::time::Duration;
///
/// let window = cpu_sample_window(Duration::from_secs(1), Duration::from_secs(2));
/// assert_eq!(window, Duration::from_secs(1));
///
/// let window = cpu_sample_window(Duration::from_millis(50), Duration::from_millis(100));
/// assert_eq!(window, MIN_CPU_SAMPLE_WINDOW);
/// ```
#[must_use]
pub fn cpu_sample_window(interval: Duration, sample_timeout: Duration) -> Duration {
    interval.min(sample_timeout / 2).max(MIN_CPU_SAMPLE_WINDOW)
}

/// Default sample timeout for a CPU source: twice the interval, and never
/// less than twice [`MIN_CPU_SAMPLE_WINDOW`].
#[must_use]
pub fn default_cpu_sample_timeout(interval: Duration) -> Duration {
    interval.max(MIN_CPU_SAMPLE_WINDOW).saturating_mul(2)
}

/// A normalized system load measurement in `[0.0, 1.0]`.
///
/// `0.0` means idle and `1.0` means fully saturated (for CPU sources, the
/// busy fraction averaged over the sampling window). Finite inputs outside
/// the range are clamped; NaN and infinities are rejected.
///
/// # Example
///
/// ```
/// use brownout_core::LoadMetric;
///
/// let metric = LoadMetric::from_percent(93.0).unwrap();
/// assert!((metric.value() - 0.93).abs() < f64::EPSILON);
///
/// assert!(LoadMetric::new(f64::NAN).is_err());
/// assert_eq!(LoadMetric::new(1.7).unwrap(), LoadMetric::MAX);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct LoadMetric(f64);

impl LoadMetric {
    /// No load.
    pub const IDLE: Self = Self(0.0);

    /// Full saturation.
    pub const MAX: Self = Self(1.0);

    /// Creates a metric from a fraction.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::OutOfRange`] if `value` is not finite.
    pub fn new(value: f64) -> Result<Self, MetricError> {
        if !value.is_finite() {
            return Err(MetricError::OutOfRange { value });
        }
        Ok(Self(value.clamp(0.0, 1.0)))
    }

    /// Creates a metric from a percentage (`0.0..=100.0`).
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::OutOfRange`] if `percent` is not finite.
    pub fn from_percent(percent: f64) -> Result<Self, MetricError> {
        if !percent.is_finite() {
            return Err(MetricError::OutOfRange { value: percent });
        }
        Self::new(percent / 100.0)
    }

    /// Returns the load as a fraction in `[0.0, 1.0]`.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns the load as a percentage in `[0.0, 100.0]`.
    #[must_use]
    pub fn as_percent(self) -> f64 {
        self.0 * 100.0
    }
}

impl TryFrom<f64> for LoadMetric {
    type Error = MetricError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LoadMetric> for f64 {
    fn from(metric: LoadMetric) -> Self {
        metric.0
    }
}

impl std::fmt::Display for LoadMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// A validated `(lower, upper)` threshold pair.
///
/// Invariant: `0.0 <= lower <= upper <= 1.0`. Equal thresholds are allowed and
/// describe a hard cutoff.
///
/// # Example
///
/// ```
/// use brownout_core::Thresholds;
///
/// let thresholds = Thresholds::new(0.90, 0.95).unwrap();
/// assert!((thresholds.width() - 0.05).abs() < 1e-9);
///
/// assert!(Thresholds::new(0.95, 0.90).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    lower: f64,
    upper: f64,
}

impl Thresholds {
    /// Validates and creates a threshold pair.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ThresholdOutOfRange`] if either value is NaN or
    /// outside `[0.0, 1.0]`, and [`BuildError::InvertedThresholds`] if
    /// `lower > upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self, BuildError> {
        if !(0.0..=1.0).contains(&lower) {
            return Err(BuildError::ThresholdOutOfRange {
                field: "lower_threshold",
                value: lower,
            });
        }
        if !(0.0..=1.0).contains(&upper) {
            return Err(BuildError::ThresholdOutOfRange {
                field: "upper_threshold",
                value: upper,
            });
        }
        if lower > upper {
            return Err(BuildError::InvertedThresholds { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Below this load requests are always admitted.
    #[must_use]
    pub const fn lower(&self) -> f64 {
        self.lower
    }

    /// Above this load requests are always shed.
    #[must_use]
    pub const fn upper(&self) -> f64 {
        self.upper
    }

    /// Width of the probabilistic band. Zero for a hard cutoff.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cpu_sample_window_fits_timeout() {
        let window = cpu_sample_window(Duration::from_secs(1), Duration::from_millis(800));
        assert_eq!(window, Duration::from_millis(400));
    }

    #[test]
    fn test_cpu_sample_window_never_below_minimum() {
        let window = cpu_sample_window(Duration::from_millis(50), Duration::from_secs(5));
        assert_eq!(window, MIN_CPU_SAMPLE_WINDOW);
    }

    #[test]
    fn test_default_cpu_sample_timeout_outlasts_window() {
        for ms in [1, 50, 100, 200, 1000, 5000] {
            let interval = Duration::from_millis(ms);
            let timeout = default_cpu_sample_timeout(interval);
            assert!(timeout > cpu_sample_window(interval, timeout), "interval {ms}ms");
        }
        assert_eq!(
            default_cpu_sample_timeout(Duration::from_secs(1)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_new_accepts_unit_interval() {
        assert_eq!(LoadMetric::new(0.0).unwrap(), LoadMetric::IDLE);
        assert_eq!(LoadMetric::new(1.0).unwrap(), LoadMetric::MAX);
        assert!((LoadMetric::new(0.42).unwrap().value() - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_new_clamps_finite_values() {
        assert_eq!(LoadMetric::new(-0.3).unwrap(), LoadMetric::IDLE);
        assert_eq!(LoadMetric::new(3.5).unwrap(), LoadMetric::MAX);
    }

    #[test]
    fn test_new_rejects_non_finite() {
        assert!(matches!(
            LoadMetric::new(f64::NAN),
            Err(MetricError::OutOfRange { .. })
        ));
        assert!(LoadMetric::new(f64::INFINITY).is_err());
        assert!(LoadMetric::from_percent(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_from_percent() {
        let metric = LoadMetric::from_percent(50.0).unwrap();
        assert!((metric.value() - 0.5).abs() < f64::EPSILON);
        assert!((metric.as_percent() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_display() {
        let metric = LoadMetric::new(0.9312).unwrap();
        assert_eq!(metric.to_string(), "0.931");
    }

    #[test]
    fn test_deserialize_validates() {
        let metric: LoadMetric = serde_json::from_str("0.25").unwrap();
        assert!((metric.value() - 0.25).abs() < f64::EPSILON);
        assert_eq!(serde_json::to_string(&metric).unwrap(), "0.25");
    }

    #[test]
    fn test_thresholds_valid() {
        let t = Thresholds::new(0.9, 0.95).unwrap();
        assert!((t.lower() - 0.9).abs() < f64::EPSILON);
        assert!((t.upper() - 0.95).abs() < f64::EPSILON);

        let step = Thresholds::new(0.8, 0.8).unwrap();
        assert!(step.width().abs() < f64::EPSILON);
    }

    #[test]
    fn test_thresholds_rejects_out_of_range() {
        assert_eq!(
            Thresholds::new(-0.1, 0.5),
            Err(BuildError::ThresholdOutOfRange {
                field: "lower_threshold",
                value: -0.1
            })
        );
        assert!(matches!(
            Thresholds::new(0.5, 1.5),
            Err(BuildError::ThresholdOutOfRange {
                field: "upper_threshold",
                ..
            })
        ));
        assert!(Thresholds::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn test_thresholds_rejects_inverted() {
        assert!(matches!(
            Thresholds::new(0.95, 0.9),
            Err(BuildError::InvertedThresholds { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_finite_inputs_stay_in_unit_interval(value in proptest::num::f64::NORMAL) {
            let metric = LoadMetric::new(value).unwrap();
            prop_assert!((0.0..=1.0).contains(&metric.value()));
        }
    }
}
