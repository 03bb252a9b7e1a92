use std::mem::replace;
use std::time::SystemTime;

use otel_core::KeyValue;

use crate::metrics::data::{self, HistogramDataPoint, MetricData};
use crate::metrics::Temporality;

use super::aggregate::{AggregateTimeInitiator, Aggregator};
use super::{Number, Tracker, ValueMap};

#[derive(Clone, Debug, PartialEq)]
struct Buckets<T> {
    counts: Vec<u64>,
    count: u64,
    total: T,
    min: T,
    max: T,
}

impl<T: Number> Buckets<T> {
    /// returns buckets with `n` bins.
    fn new(n: usize) -> Buckets<T> {
        Buckets {
            counts: vec![0; n],
            count: 0,
            total: T::default(),
            min: T::max(),
            max: T::min(),
        }
    }

    fn bin(&mut self, idx: usize, value: T) {
        self.counts[idx] += 1;
        self.count += 1;
        self.total += value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value
        }
    }

    /// Folds `other`, recorded with the same boundaries, into `self`.
    fn merge(&mut self, other: &Buckets<T>) {
        for (count, add) in self.counts.iter_mut().zip(&other.counts) {
            *count += add;
        }
        self.count += other.count;
        self.total += other.total;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }
}

struct HistogramTracker<T> {
    window: Buckets<T>,
    cumulative: Option<Buckets<T>>,
}

impl<T: Number> Tracker for HistogramTracker<T> {
    /// Number of buckets.
    type Config = usize;
    /// Value and bucket index
    type Measurement = (T, usize);

    fn create(count: &usize) -> Self {
        HistogramTracker {
            window: Buckets::new(*count),
            cumulative: None,
        }
    }

    fn update(&mut self, (value, index): (T, usize)) {
        self.window.bin(index, value);
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
pub(crate) struct Histogram<T: Number> {
    value_map: ValueMap<HistogramTracker<T>>,
    bounds: Vec<f64>,
    record_min_max: bool,
    record_sum: bool,
    time: AggregateTimeInitiator,
}

impl<T: Number> Histogram<T> {
    pub(crate) fn new(mut bounds: Vec<f64>, record_min_max: bool, record_sum: bool) -> Self {
        bounds.retain(|v| !v.is_nan());
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup();

        Histogram {
            value_map: ValueMap::new(bounds.len() + 1),
            bounds,
            record_min_max,
            record_sum,
            time: AggregateTimeInitiator::default(),
        }
    }

    fn data_point(
        &self,
        attributes: Vec<KeyValue>,
        buckets: &Buckets<T>,
        start_time: SystemTime,
        time: SystemTime,
    ) -> HistogramDataPoint<T> {
        let has_min_max = self.record_min_max && buckets.count > 0;
        HistogramDataPoint {
            attributes,
            start_time,
            time,
            count: buckets.count,
            bounds: self.bounds.clone(),
            bucket_counts: buckets.counts.clone(),
            min: has_min_max.then_some(buckets.min),
            max: has_min_max.then_some(buckets.max),
            sum: if self.record_sum {
                buckets.total
            } else {
                T::default()
            },
        }
    }
}

impl<T: Number> Aggregator<T> for Histogram<T> {
    fn aggregate(&self, measurement: T, attrs: &[KeyValue]) {
        let f = measurement.into_float();
        if f.is_nan() {
            return;
        }
        // This search will return an index in the range `[0, bounds.len()]`, where
        // it will return `bounds.len()` if value is greater than the last element
        // of `bounds`. This aligns with the buckets in that the length of buckets
        // is `bounds.len()+1`, with the last bucket representing:
        // `(bounds[bounds.len()-1], +∞)`.
        let index = self.bounds.partition_point(|&x| x < f);

        self.value_map.measure((measurement, index), attrs);
    }

    fn collect(&self, temporality: Temporality, now: SystemTime) -> Option<MetricData<T>> {
        let time = self.time.window(temporality, now);
        let n = *self.value_map.config();

        let data_points = self.value_map.collect(|attributes, tracker| {
            let window = replace(&mut tracker.window, Buckets::new(n));
            match temporality {
                Temporality::Delta => (window.count > 0).then(|| {
                    self.data_point(attributes.to_vec(), &window, time.start, time.current)
                }),
                Temporality::Cumulative => {
                    let cumulative = tracker.cumulative.get_or_insert_with(|| Buckets::new(n));
                    cumulative.merge(&window);
                    (cumulative.count > 0).then(|| {
                        self.data_point(attributes.to_vec(), cumulative, time.start, time.current)
                    })
                }
            }
        });

        if data_points.is_empty() {
            return None;
        }

        Some(
            data::Histogram {
                data_points,
                temporality,
            }
            .into(),
        )
    }
}
