use std::time::SystemTime;

use otel_core::KeyValue;

use crate::metrics::data::{self, MetricData, SumDataPoint};
use crate::metrics::Temporality;

use super::aggregate::{AggregateTimeInitiator, Aggregator};
use super::{Number, Tracker, ValueMap};

struct Observed<T> {
    /// Last value observed by a callback, until collected.
    value: Option<T>,
    /// Value handed out by the previous collection.
    reported: T,
}

impl<T: Number> Tracker for Observed<T> {
    type Config = ();
    type Measurement = T;

    fn create(_config: &()) -> Self {
        Observed {
            value: None,
            reported: T::default(),
        }
    }

    fn update(&mut self, value: T) {
        self.value = Some(value);
    }
}

/// Summarizes values reported by observable counters.
///
/// Observations are the current total, so each one replaces the previous.
/// Delta output is the difference from what was last reported. An attribute
/// set that was not observed since the last collection reports nothing.
pub(crate) struct PrecomputedSum<T: Number> {
    value_map: ValueMap<Observed<T>>,
    monotonic: bool,
    time: AggregateTimeInitiator,
}

impl<T: Number> PrecomputedSum<T> {
    pub(crate) fn new(monotonic: bool) -> Self {
        PrecomputedSum {
            value_map: ValueMap::new(()),
            monotonic,
            time: AggregateTimeInitiator::default(),
        }
    }
}

impl<T: Number> Aggregator<T> for PrecomputedSum<T> {
    fn aggregate(&self, value: T, attributes: &[KeyValue]) {
        self.value_map.measure(value, attributes);
    }

    fn collect(&self, temporality: Temporality, now: SystemTime) -> Option<MetricData<T>> {
        let time = self.time.window(temporality, now);

        let data_points = self.value_map.collect(|attributes, tracker| {
            let value = tracker.value.take()?;
            let reported = match temporality {
                Temporality::Delta => value.diff(tracker.reported),
                Temporality::Cumulative => value,
            };
            tracker.reported = value;

            Some(SumDataPoint {
                attributes: attributes.to_vec(),
                start_time: time.start,
                time: time.current,
                value: reported,
            })
        });

        if data_points.is_empty() {
            return None;
        }

        Some(
            data::Sum {
                data_points,
                temporality,
                is_monotonic: self.monotonic,
            }
            .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<T: Number>(data: Option<MetricData<T>>) -> Vec<T> {
        match data {
            Some(MetricData::Sum(sum)) => sum.data_points.into_iter().map(|p| p.value).collect(),
            None => vec![],
            Some(other) => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn cumulative_reports_observation_as_is() {
        let sum = PrecomputedSum::<u64>::new(true);
        sum.aggregate(10, &[]);
        sum.aggregate(15, &[]);
        assert_eq!(values(sum.collect(Temporality::Cumulative, SystemTime::now())), vec![15]);

        sum.aggregate(20, &[]);
        assert_eq!(values(sum.collect(Temporality::Cumulative, SystemTime::now())), vec![20]);
    }

    #[test]
    fn delta_reports_difference() {
        let sum = PrecomputedSum::<i64>::new(false);
        for (observed, expected) in [(10, 10), (25, 15), (20, -5)] {
            sum.aggregate(observed, &[]);
            assert_eq!(
                values(sum.collect(Temporality::Delta, SystemTime::now())),
                vec![expected]
            );
        }
    }

    #[test]
    fn unsigned_delta_saturates_on_reset() {
        let sum = PrecomputedSum::<u64>::new(true);
        sum.aggregate(100, &[]);
        let _ = sum.collect(Temporality::Delta, SystemTime::now());
        sum.aggregate(40, &[]);
        assert_eq!(values(sum.collect(Temporality::Delta, SystemTime::now())), vec![0]);
    }

    #[test]
    fn unobserved_sets_stop_reporting() {
        let sum = PrecomputedSum::<u64>::new(true);
        sum.aggregate(1, &[KeyValue::new("cpu", 0_i64)]);
        sum.aggregate(1, &[KeyValue::new("cpu", 1_i64)]);
        assert_eq!(values(sum.collect(Temporality::Cumulative, SystemTime::now())).len(), 2);

        sum.aggregate(2, &[KeyValue::new("cpu", 0_i64)]);
        assert_eq!(values(sum.collect(Temporality::Cumulative, SystemTime::now())), vec![2]);

        assert!(sum.collect(Temporality::Cumulative, SystemTime::now()).is_none());
    }
}
