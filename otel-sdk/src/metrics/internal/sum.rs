use std::mem;
use std::time::SystemTime;

use otel_core::KeyValue;

use crate::metrics::data::{self, MetricData, SumDataPoint};
use crate::metrics::Temporality;

use super::aggregate::{AggregateTimeInitiator, Aggregator};
use super::{Number, Tracker, ValueMap};

struct Increment<T> {
    /// Change since the last collection.
    window: T,
    /// Everything collected so far.
    total: T,
}

impl<T: Number> Tracker for Increment<T> {
    type Config = ();
    type Measurement = T;

    fn create(_config: &()) -> Self {
        Increment {
            window: T::default(),
            total: T::default(),
        }
    }

    fn update(&mut self, value: T) {
        self.window += value
    }
}

/// Summarizes a set of measurements made as their arithmetic sum.
///
/// Measurements are increments, so the running value is a delta: a delta
/// collection hands it out and resets it, a cumulative collection folds it
/// into the total first. Every attribute set seen so far reports a point, a
/// quiet delta window reports zero.
pub(crate) struct Sum<T: Number> {
    value_map: ValueMap<Increment<T>>,
    monotonic: bool,
    time: AggregateTimeInitiator,
}

impl<T: Number> Sum<T> {
    pub(crate) fn new(monotonic: bool) -> Self {
        Sum {
            value_map: ValueMap::new(()),
            monotonic,
            time: AggregateTimeInitiator::default(),
        }
    }
}

impl<T: Number> Aggregator<T> for Sum<T> {
    fn aggregate(&self, value: T, attributes: &[KeyValue]) {
        self.value_map.measure(value, attributes);
    }

    fn collect(&self, temporality: Temporality, now: SystemTime) -> Option<MetricData<T>> {
        let time = self.time.window(temporality, now);

        let data_points = self.value_map.collect(|attributes, tracker| {
            let window = mem::take(&mut tracker.window);
            tracker.total += window;
            Some(SumDataPoint {
                attributes: attributes.to_vec(),
                start_time: time.start,
                time: time.current,
                value: match temporality {
                    Temporality::Delta => window,
                    Temporality::Cumulative => tracker.total,
                },
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
