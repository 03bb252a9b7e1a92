use std::fmt;

use crate::metrics::internal::{EXPO_MAX_SCALE, EXPO_MIN_SCALE};
use crate::metrics::{MetricError, MetricResult};

/// Bucket boundaries used by histograms that configure none.
pub(crate) const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];

/// The way recorded measurements are summarized.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Aggregation {
    /// An aggregation that drops all recorded data.
    Drop,

    /// An aggregation that uses the default instrument kind selection mapping to
    /// select another aggregation.
    ///
    /// * Counter, UpDownCounter and their observable variants ⇨ Sum
    /// * Gauge and Observable Gauge ⇨ LastValue
    /// * Histogram ⇨ ExplicitBucketHistogram with the default boundaries
    Default,

    /// An aggregation that summarizes a set of measurements as their arithmetic
    /// sum.
    Sum,

    /// An aggregation that summarizes a set of measurements as the last one made.
    LastValue,

    /// An aggregation that summarizes a set of measurements as a histogram with
    /// explicitly defined buckets.
    ExplicitBucketHistogram {
        /// The increasing bucket boundary values.
        ///
        /// Boundary values define bucket upper bounds. Buckets are exclusive of their
        /// lower boundary and inclusive of their upper bound (except at positive
        /// infinity). Boundaries of `[0.0, 5.0, 10.0]` define the buckets
        /// `(-∞, 0]`, `(0, 5]`, `(5, 10]` and `(10, +∞)`.
        boundaries: Vec<f64>,

        /// Whether the min and max of the distribution are recorded.
        record_min_max: bool,
    },

    /// An aggregation that summarizes a set of measurements as a histogram with
    /// bucket widths that grow exponentially.
    Base2ExponentialHistogram {
        /// The maximum number of buckets to use for the histogram.
        max_size: u32,

        /// The maximum resolution scale to use for the histogram.
        ///
        /// The maximum value is `20`, the minimum value is `-10` in which case
        /// only two buckets cover the whole range of `f64`.
        max_scale: i8,

        /// Whether the min and max of the distribution are recorded.
        record_min_max: bool,
    },
}

impl Aggregation {
    /// The default explicit bucket histogram.
    pub fn default_histogram() -> Self {
        Aggregation::ExplicitBucketHistogram {
            boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            record_min_max: true,
        }
    }

    /// An exponential histogram with 160 buckets at scale 20.
    pub fn default_exponential_histogram() -> Self {
        Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale: EXPO_MAX_SCALE,
            record_min_max: true,
        }
    }

    /// Validate that this aggregation has correct configuration
    pub fn validate(&self) -> MetricResult<()> {
        match self {
            Aggregation::Drop => Ok(()),
            Aggregation::Default => Ok(()),
            Aggregation::Sum => Ok(()),
            Aggregation::LastValue => Ok(()),
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                if boundaries.iter().any(|b| b.is_nan()) {
                    return Err(MetricError::Config(format!(
                        "aggregation: explicit bucket histogram: NaN boundary: {:?}",
                        boundaries,
                    )));
                }
                for x in boundaries.windows(2) {
                    if x[0] >= x[1] {
                        return Err(MetricError::Config(format!(
                            "aggregation: explicit bucket histogram: non-monotonic boundaries: {:?}",
                            boundaries,
                        )));
                    }
                }

                Ok(())
            }
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                ..
            } => {
                if *max_scale > EXPO_MAX_SCALE {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max scale ({}) is greater than {}",
                        max_scale, EXPO_MAX_SCALE,
                    )));
                }
                if *max_scale < EXPO_MIN_SCALE {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max scale ({}) is less than {}",
                        max_scale, EXPO_MIN_SCALE,
                    )));
                }
                if *max_size < 2 {
                    return Err(MetricError::Config(format!(
                        "aggregation: exponential histogram: max size ({}) is less than 2",
                        max_size,
                    )));
                }

                Ok(())
            }
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // used for stream id comparisons
        let name = match self {
            Aggregation::Drop => "Drop",
            Aggregation::Default => "Default",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
            Aggregation::Base2ExponentialHistogram { .. } => "Base2ExponentialHistogram",
        };

        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::sorted(vec![0.0, 5.0, 10.0], true)]
    #[case::empty(vec![], true)]
    #[case::unsorted(vec![5.0, 1.0], false)]
    #[case::duplicate(vec![1.0, 1.0], false)]
    #[case::nan(vec![1.0, f64::NAN], false)]
    fn validates_histogram_boundaries(#[case] boundaries: Vec<f64>, #[case] valid: bool) {
        let agg = Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max: true,
        };
        assert_eq!(agg.validate().is_ok(), valid);
    }

    #[rstest]
    #[case(20, true)]
    #[case(-10, true)]
    #[case(0, true)]
    #[case(21, false)]
    #[case(-11, false)]
    fn validates_exponential_scale(#[case] max_scale: i8, #[case] valid: bool) {
        let agg = Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale,
            record_min_max: true,
        };
        assert_eq!(agg.validate().is_ok(), valid);
    }

    #[test]
    fn default_histogram_is_valid() {
        assert!(Aggregation::default_histogram().validate().is_ok());
        assert!(Aggregation::default_exponential_histogram().validate().is_ok());
        assert_eq!(Aggregation::default_histogram().to_string(), "ExplicitBucketHistogram");
    }
}
