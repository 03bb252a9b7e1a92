use std::time::SystemTime;

use otel_core::KeyValue;

use crate::metrics::data::{self, GaugeDataPoint, MetricData};
use crate::metrics::Temporality;

use super::aggregate::Aggregator;
use super::{Number, Tracker, ValueMap};

struct Latest<T> {
    value: Option<T>,
}

impl<T: Number> Tracker for Latest<T> {
    type Config = ();
    type Measurement = T;

    fn create(_config: &()) -> Self {
        Latest { value: None }
    }

    fn update(&mut self, value: T) {
        self.value = Some(value);
    }
}

/// Summarizes a set of measurements as the last one made.
///
/// A value is reported once. Until a new measurement arrives its attribute
/// set yields nothing, whatever the temporality. Points carry no start time.
pub(crate) struct LastValue<T: Number> {
    value_map: ValueMap<Latest<T>>,
}

impl<T: Number> LastValue<T> {
    pub(crate) fn new() -> Self {
        LastValue {
            value_map: ValueMap::new(()),
        }
    }
}

impl<T: Number> Aggregator<T> for LastValue<T> {
    fn aggregate(&self, value: T, attributes: &[KeyValue]) {
        self.value_map.measure(value, attributes)
    }

    fn collect(&self, _temporality: Temporality, now: SystemTime) -> Option<MetricData<T>> {
        let data_points = self.value_map.collect(|attributes, tracker| {
            tracker.value.take().map(|value| GaugeDataPoint {
                attributes: attributes.to_vec(),
                start_time: None,
                time: now,
                value,
            })
        });

        if data_points.is_empty() {
            None
        } else {
            Some(data::Gauge { data_points }.into())
        }
    }
}
