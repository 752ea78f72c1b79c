//! Shedding criteria.
//!
//! A criterion turns one load sample into an admit/shed decision. The default
//! [`LinearRampCriterion`] admits everything below the lower threshold, sheds
//! everything above the upper threshold, and in between sheds with a
//! probability that grows linearly across the band:
//!
//! ```text
//! P(shed)
//!   1 ┤                 ┌──────
//!     │                /
//!     │              /
//!   0 ┼────────────┘
//!     0          lower upper   1   load
//! ```

use brownout_core::{BuildError, LoadMetric, Thresholds};
use rand::Rng;

/// Decides whether a request should be shed at the given load.
///
/// Implemented for any `Fn(LoadMetric) -> bool`.
///
/// # Example
///
/// ```
/// use brownout_core::LoadMetric;
/// use brownout_middleware::ShedCriterion;
///
/// let above_half = |metric: LoadMetric| metric.value() > 0.5;
/// assert!(above_half.should_shed(LoadMetric::MAX));
/// ```
pub trait ShedCriterion: Send + Sync + 'static {
    /// Returns true if a request arriving at `metric` load should be shed.
    fn should_shed(&self, metric: LoadMetric) -> bool;
}

impl<F> ShedCriterion for F
where
    F: Fn(LoadMetric) -> bool + Send + Sync + 'static,
{
    fn should_shed(&self, metric: LoadMetric) -> bool {
        self(metric)
    }
}

/// Linear probabilistic shedding between two thresholds.
///
/// When both thresholds are equal the ramp degenerates to a step: loads at or
/// below the threshold are admitted and loads above it are shed.
///
/// # Example
///
/// ```
/// use brownout_core::LoadMetric;
/// use brownout_middleware::LinearRampCriterion;
///
/// let criterion = LinearRampCriterion::new(0.90, 0.95).unwrap();
///
/// let p = criterion.rejection_probability(LoadMetric::new(0.93).unwrap());
/// assert!((p - 0.6).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRampCriterion {
    thresholds: Thresholds,
}

impl LinearRampCriterion {
    /// Creates a criterion from raw thresholds.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] unless `0.0 <= lower <= upper <= 1.0`.
    pub fn new(lower: f64, upper: f64) -> Result<Self, BuildError> {
        Ok(Self::from_thresholds(Thresholds::new(lower, upper)?))
    }

    /// Creates a criterion from already validated thresholds.
    #[must_use]
    pub const fn from_thresholds(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    /// Returns the thresholds.
    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Probability in `[0.0, 1.0]` that a request at `metric` load is shed.
    #[must_use]
    pub fn rejection_probability(&self, metric: LoadMetric) -> f64 {
        let load = metric.value();
        let lower = self.thresholds.lower();
        let upper = self.thresholds.upper();

        if load < lower {
            return 0.0;
        }
        if load > upper {
            return 1.0;
        }

        let width = self.thresholds.width();
        if width <= 0.0 {
            // lower == upper == load
            return 0.0;
        }

        ((load - lower) / width).clamp(0.0, 1.0)
    }

    /// Decides using the given random number generator.
    ///
    /// Sheds when a uniform draw from `[0, 1)` falls below the rejection
    /// probability, so a probability of `0.0` never sheds and `1.0` always
    /// does. No number is drawn outside the band.
    pub fn should_shed_with<R: Rng + ?Sized>(&self, metric: LoadMetric, rng: &mut R) -> bool {
        let probability = self.rejection_probability(metric);
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        rng.gen::<f64>() < probability
    }
}

impl ShedCriterion for LinearRampCriterion {
    fn should_shed(&self, metric: LoadMetric) -> bool {
        self.should_shed_with(metric, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn load(value: f64) -> LoadMetric {
        LoadMetric::new(value).unwrap()
    }

    fn criterion() -> LinearRampCriterion {
        LinearRampCriterion::new(0.90, 0.95).unwrap()
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        assert!(matches!(
            LinearRampCriterion::new(0.95, 0.90),
            Err(BuildError::InvertedThresholds { .. })
        ));
        assert!(matches!(
            LinearRampCriterion::new(0.5, 1.2),
            Err(BuildError::ThresholdOutOfRange { .. })
        ));
    }

    #[test]
    fn test_below_lower_always_admits() {
        let criterion = criterion();
        for _ in 0..1_000 {
            assert!(!criterion.should_shed(load(0.89)));
        }
    }

    #[test]
    fn test_above_upper_always_sheds() {
        let criterion = criterion();
        for _ in 0..1_000 {
            assert!(criterion.should_shed(load(0.96)));
        }
    }

    #[test]
    fn test_band_edges() {
        let criterion = criterion();
        assert!(criterion.rejection_probability(load(0.90)).abs() < f64::EPSILON);
        assert!((criterion.rejection_probability(load(0.95)) - 1.0).abs() < f64::EPSILON);

        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1_000 {
            assert!(!criterion.should_shed_with(load(0.90), &mut rng));
            assert!(criterion.should_shed_with(load(0.95), &mut rng));
        }
    }

    #[test]
    fn test_step_function_when_thresholds_equal() {
        let criterion = LinearRampCriterion::new(0.8, 0.8).unwrap();

        assert!(!criterion.should_shed(load(0.79)));
        assert!(!criterion.should_shed(load(0.8)));
        assert!(criterion.should_shed(load(0.81)));
        assert!(criterion.rejection_probability(load(0.8)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_thresholds_shed_any_load() {
        let criterion = LinearRampCriterion::new(0.0, 0.0).unwrap();
        assert!(!criterion.should_shed(LoadMetric::IDLE));
        assert!(criterion.should_shed(load(0.01)));
    }

    #[test]
    fn test_shed_rate_matches_probability() {
        let criterion = criterion();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let metric = load(0.93);

        let total = 100_000;
        let shed = (0..total)
            .filter(|_| criterion.should_shed_with(metric, &mut rng))
            .count();

        #[allow(clippy::cast_precision_loss)]
        let rate = shed as f64 / f64::from(total);
        assert!((rate - 0.6).abs() < 0.01, "shed rate {rate}");
    }

    #[test]
    fn test_closure_criterion() {
        let never = |_: LoadMetric| false;
        assert!(!never.should_shed(LoadMetric::MAX));
    }

    proptest! {
        #[test]
        fn prop_probability_in_unit_interval(
            lower in 0.0f64..=1.0,
            width in 0.0f64..=1.0,
            value in 0.0f64..=1.0,
        ) {
            let upper = (lower + width).min(1.0);
            let criterion = LinearRampCriterion::new(lower, upper).unwrap();
            let p = criterion.rejection_probability(load(value));
            prop_assert!((0.0..=1.0).contains(&p));
        }

        #[test]
        fn prop_probability_monotonic(
            lower in 0.0f64..=1.0,
            width in 0.0f64..=1.0,
            a in 0.0f64..=1.0,
            b in 0.0f64..=1.0,
        ) {
            let upper = (lower + width).min(1.0);
            let criterion = LinearRampCriterion::new(lower, upper).unwrap();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                criterion.rejection_probability(load(low))
                    <= criterion.rejection_probability(load(high))
            );
        }

        #[test]
        fn prop_outside_band_is_deterministic(
            lower in 0.05f64..=0.95,
            value in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let upper = (lower + 0.04).min(1.0);
            let criterion = LinearRampCriterion::new(lower, upper).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            if value < lower {
                prop_assert!(!criterion.should_shed_with(load(value), &mut rng));
            }
            if value > upper {
                prop_assert!(criterion.should_shed_with(load(value), &mut rng));
            }
        }
    }
}
