mod aggregate;
mod attribute_set;
mod exponential_histogram;
mod histogram;
mod last_value;
mod precomputed_sum;
mod sum;

use core::fmt;
use std::collections::HashMap;
use std::ops::{Add, AddAssign, Sub};
use std::sync::{Arc, Mutex, RwLock};

use otel_core::KeyValue;

pub(crate) use aggregate::{AggregateBuilder, AggregateFns, ComputeAggregation, Filter, Measure};
pub(crate) use attribute_set::AttributeSet;
pub(crate) use exponential_histogram::{EXPO_MAX_SCALE, EXPO_MIN_SCALE};

use crate::metrics::data::{AggregatedMetrics, MetricData};

/// The value types measurements are recorded with: `u64`, `i64` and `f64`.
pub(crate) trait Number:
    Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + PartialOrd
    + fmt::Debug
    + Clone
    + Copy
    + PartialEq
    + Default
    + Send
    + Sync
    + 'static
{
    fn min() -> Self;
    fn max() -> Self;

    fn into_float(self) -> f64;

    /// `self - previous`. Unsigned values saturate at zero.
    fn diff(self, previous: Self) -> Self;

    fn into_aggregated(data: MetricData<Self>) -> AggregatedMetrics;
}

impl Number for i64 {
    fn min() -> Self {
        i64::MIN
    }

    fn max() -> Self {
        i64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn diff(self, previous: Self) -> Self {
        self.wrapping_sub(previous)
    }

    fn into_aggregated(data: MetricData<Self>) -> AggregatedMetrics {
        data.into()
    }
}

impl Number for u64 {
    fn min() -> Self {
        u64::MIN
    }

    fn max() -> Self {
        u64::MAX
    }

    fn into_float(self) -> f64 {
        // May have precision loss at high values
        self as f64
    }

    fn diff(self, previous: Self) -> Self {
        self.saturating_sub(previous)
    }

    fn into_aggregated(data: MetricData<Self>) -> AggregatedMetrics {
        data.into()
    }
}

impl Number for f64 {
    fn min() -> Self {
        f64::MIN
    }

    fn max() -> Self {
        f64::MAX
    }

    fn into_float(self) -> f64 {
        self
    }

    fn diff(self, previous: Self) -> Self {
        self - previous
    }

    fn into_aggregated(data: MetricData<Self>) -> AggregatedMetrics {
        data.into()
    }
}

/// State kept for one attribute set of one stream.
pub(crate) trait Tracker: Send + 'static {
    /// Shared configuration used to create new trackers.
    type Config: Send + Sync + 'static;
    /// What a single measurement carries once pre-processed by the aggregator.
    type Measurement;

    fn create(config: &Self::Config) -> Self;

    fn update(&mut self, measurement: Self::Measurement);
}

/// Per-stream map from attribute set to its tracker.
///
/// Lookups of known attribute sets only take the read lock. A new attribute
/// set takes the write lock and re-checks before inserting. Updates of one
/// attribute set are serialized by the tracker's own mutex.
pub(crate) struct ValueMap<S: Tracker> {
    trackers: RwLock<HashMap<AttributeSet, Arc<Mutex<S>>>>,
    config: S::Config,
}

impl<S: Tracker> ValueMap<S> {
    pub(crate) fn new(config: S::Config) -> Self {
        ValueMap {
            trackers: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub(crate) fn config(&self) -> &S::Config {
        &self.config
    }

    /// Applies a measurement to the tracker of `attributes`, creating it if
    /// needed. A poisoned lock drops the measurement.
    pub(crate) fn measure(&self, measurement: S::Measurement, attributes: &[KeyValue]) {
        let attributes = AttributeSet::from(attributes);

        let existing = match self.trackers.read() {
            Ok(trackers) => trackers.get(&attributes).cloned(),
            Err(_) => return,
        };

        let tracker = match existing {
            Some(tracker) => tracker,
            None => {
                let Ok(mut trackers) = self.trackers.write() else {
                    return;
                };
                // another thread may have inserted it since the read lock was released
                trackers
                    .entry(attributes)
                    .or_insert_with(|| Arc::new(Mutex::new(S::create(&self.config))))
                    .clone()
            }
        };

        if let Ok(mut tracker) = tracker.lock() {
            tracker.update(measurement);
        };
    }

    /// Visits every attribute set, collecting whatever `f` produces.
    ///
    /// Each tracker is locked only for the duration of its own visit, so
    /// concurrent measurements on other attribute sets are not blocked.
    pub(crate) fn collect<R>(&self, mut f: impl FnMut(&AttributeSet, &mut S) -> Option<R>) -> Vec<R> {
        let trackers = match self.trackers.read() {
            Ok(trackers) => trackers,
            Err(_) => return Vec::new(),
        };

        let mut out = Vec::with_capacity(trackers.len());
        for (attributes, tracker) in trackers.iter() {
            if let Ok(mut tracker) = tracker.lock() {
                if let Some(point) = f(attributes, &mut tracker) {
                    out.push(point);
                }
            }
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.trackers.read().map(|t| t.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Count(u64);

    impl Tracker for Count {
        type Config = ();
        type Measurement = u64;

        fn create(_config: &()) -> Self {
            Count(0)
        }

        fn update(&mut self, measurement: u64) {
            self.0 += measurement;
        }
    }

    #[test]
    fn u64_diff_saturates() {
        assert_eq!(5_u64.diff(3), 2);
        assert_eq!(3_u64.diff(5), 0);
        assert_eq!(3_i64.diff(5), -2);
        assert_eq!(1.5_f64.diff(2.0), -0.5);
    }

    #[test]
    fn value_map_groups_by_attribute_set() {
        let map = ValueMap::<Count>::new(());
        map.measure(1, &[KeyValue::new("a", 1_i64), KeyValue::new("b", 2_i64)]);
        map.measure(2, &[KeyValue::new("b", 2_i64), KeyValue::new("a", 1_i64)]);
        map.measure(4, &[]);

        assert_eq!(map.len(), 2);
        let mut totals = map.collect(|_, count| Some(count.0));
        totals.sort();
        assert_eq!(totals, vec![3, 4]);
    }

    #[test]
    fn concurrent_measurements_are_not_lost() {
        let map = Arc::new(ValueMap::<Count>::new(()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let map = map.clone();
                thread::spawn(move || {
                    for i in 0..1000_i64 {
                        map.measure(1, &[KeyValue::new("shard", i % 8)]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total: u64 = map.collect(|_, count| Some(count.0)).into_iter().sum();
        assert_eq!(total, 4000);
        assert_eq!(map.len(), 8);
    }
}
