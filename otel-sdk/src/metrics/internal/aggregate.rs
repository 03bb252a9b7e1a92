use std::{
    marker,
    mem::replace,
    ops::DerefMut,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use otel_core::KeyValue;

use crate::metrics::{
    data::{AggregatedMetrics, MetricData},
    Temporality,
};

use super::{
    exponential_histogram::ExpoHistogram, histogram::Histogram, last_value::LastValue,
    precomputed_sum::PrecomputedSum, sum::Sum, Number,
};

/// Receives measurements to be aggregated.
pub(crate) trait Measure<T>: Send + Sync + 'static {
    fn call(&self, measurement: T, attrs: &[KeyValue]);
}

/// Produces the output of one stream at collection time.
pub(crate) trait ComputeAggregation: Send + Sync + 'static {
    /// Collects the stream with `now` as the end of the window.
    ///
    /// Returns `None` if no attribute set produced a point.
    fn call(&self, now: SystemTime) -> Option<AggregatedMetrics>;
}

/// Accumulates measurements per attribute set and reports them as points.
pub(crate) trait Aggregator<T>: Send + Sync + 'static {
    fn aggregate(&self, value: T, attributes: &[KeyValue]);

    /// Reads, and for the delta parts resets, the accumulated state.
    fn collect(&self, temporality: Temporality, now: SystemTime) -> Option<MetricData<T>>;
}

/// Separate `measure` and `collect` functions for an aggregate.
pub(crate) struct AggregateFns<T> {
    pub(crate) measure: Arc<dyn Measure<T>>,
    pub(crate) collect: Arc<dyn ComputeAggregation>,
}

/// Binds an [Aggregator] to the attribute filter and temporality of its stream.
struct Aggregate<T, A> {
    aggregator: A,
    filter: AttributeSetFilter,
    temporality: Temporality,
    _marker: marker::PhantomData<T>,
}

impl<T: Number, A: Aggregator<T>> Measure<T> for Aggregate<T, A> {
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        self.filter
            .apply(attrs, |filtered| self.aggregator.aggregate(measurement, filtered))
    }
}

impl<T: Number, A: Aggregator<T>> ComputeAggregation for Aggregate<T, A> {
    fn call(&self, now: SystemTime) -> Option<AggregatedMetrics> {
        self.aggregator
            .collect(self.temporality, now)
            .map(T::into_aggregated)
    }
}

impl<T: Number, A: Aggregator<T>> From<Aggregate<T, A>> for AggregateFns<T> {
    fn from(value: Aggregate<T, A>) -> Self {
        let inst = Arc::new(value);
        Self {
            measure: inst.clone(),
            collect: inst,
        }
    }
}

pub(crate) struct AggregateTime {
    pub(crate) start: SystemTime,
    pub(crate) current: SystemTime,
}

/// Tracks the start of the current delta window and of the whole series.
pub(crate) struct AggregateTimeInitiator {
    created: SystemTime,
    last_collect: Mutex<SystemTime>,
}

impl AggregateTimeInitiator {
    pub(crate) fn delta(&self, now: SystemTime) -> AggregateTime {
        let start_time = self
            .last_collect
            .lock()
            .map(|mut start| replace(start.deref_mut(), now))
            .unwrap_or(now);
        AggregateTime {
            start: start_time,
            current: now,
        }
    }

    pub(crate) fn cumulative(&self, now: SystemTime) -> AggregateTime {
        if let Ok(mut last) = self.last_collect.lock() {
            *last = now;
        }
        AggregateTime {
            start: self.created,
            current: now,
        }
    }

    pub(crate) fn window(&self, temporality: Temporality, now: SystemTime) -> AggregateTime {
        match temporality {
            Temporality::Delta => self.delta(now),
            Temporality::Cumulative => self.cumulative(now),
        }
    }
}

impl Default for AggregateTimeInitiator {
    fn default() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            last_collect: Mutex::new(now),
        }
    }
}

pub(crate) type Filter = Arc<dyn Fn(&KeyValue) -> bool + Send + Sync>;

/// Applies filter on provided attribute set
/// No-op, if filter is not set
#[derive(Clone)]
pub(crate) struct AttributeSetFilter {
    filter: Option<Filter>,
}

impl AttributeSetFilter {
    pub(crate) fn new(filter: Option<Filter>) -> Self {
        Self { filter }
    }

    pub(crate) fn apply(&self, attrs: &[KeyValue], run: impl FnOnce(&[KeyValue])) {
        if let Some(filter) = &self.filter {
            let filtered_attrs: Vec<KeyValue> =
                attrs.iter().filter(|kv| filter(kv)).cloned().collect();
            run(&filtered_attrs);
        } else {
            run(attrs);
        };
    }
}

/// Builds aggregate functions
pub(crate) struct AggregateBuilder<T> {
    /// The temporality used for the returned aggregate functions.
    temporality: Temporality,

    /// The attribute filter the aggregate function will use on the input of
    /// measurements.
    filter: AttributeSetFilter,

    _marker: marker::PhantomData<T>,
}

impl<T: Number> AggregateBuilder<T> {
    pub(crate) fn new(temporality: Temporality, filter: Option<Filter>) -> Self {
        AggregateBuilder {
            temporality,
            filter: AttributeSetFilter::new(filter),
            _marker: marker::PhantomData,
        }
    }

    fn bind<A: Aggregator<T>>(&self, aggregator: A) -> AggregateFns<T> {
        Aggregate {
            aggregator,
            filter: self.filter.clone(),
            temporality: self.temporality,
            _marker: marker::PhantomData,
        }
        .into()
    }

    /// Builds a last-value aggregate function input and output.
    pub(crate) fn last_value(&self) -> AggregateFns<T> {
        self.bind(LastValue::new())
    }

    /// Builds a sum over values reported by callbacks, which already carry the
    /// running total.
    pub(crate) fn precomputed_sum(&self, monotonic: bool) -> AggregateFns<T> {
        self.bind(PrecomputedSum::new(monotonic))
    }

    /// Builds a sum aggregate function input and output.
    pub(crate) fn sum(&self, monotonic: bool) -> AggregateFns<T> {
        self.bind(Sum::new(monotonic))
    }

    /// Builds a histogram aggregate function input and output.
    pub(crate) fn explicit_bucket_histogram(
        &self,
        boundaries: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
    ) -> AggregateFns<T> {
        self.bind(Histogram::new(boundaries, record_min_max, record_sum))
    }

    /// Builds an exponential histogram aggregate function input and output.
    pub(crate) fn exponential_bucket_histogram(
        &self,
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
        record_sum: bool,
    ) -> AggregateFns<T> {
        self.bind(ExpoHistogram::new(
            max_size,
            max_scale,
            record_min_max,
            record_sum,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::{MetricData, Sum};
    use otel_core::Key;
    use std::collections::HashSet;

    fn sum_of(data: Option<AggregatedMetrics>) -> Sum<u64> {
        match data {
            Some(AggregatedMetrics::U64(MetricData::Sum(sum))) => sum,
            other => panic!("unexpected aggregation: {other:?}"),
        }
    }

    #[test]
    fn filter_drops_unlisted_keys() {
        let allowed: HashSet<Key> = [Key::new("keep")].into_iter().collect();
        let filter: Filter = Arc::new(move |kv: &KeyValue| allowed.contains(&kv.key));
        let fns = AggregateBuilder::<u64>::new(Temporality::Cumulative, Some(filter)).sum(true);

        fns.measure.call(1, &[KeyValue::new("keep", "a"), KeyValue::new("drop", "x")]);
        fns.measure.call(2, &[KeyValue::new("keep", "a"), KeyValue::new("drop", "y")]);

        let sum = sum_of(fns.collect.call(SystemTime::now()));
        assert_eq!(sum.data_points.len(), 1);
        assert_eq!(sum.data_points[0].value, 3);
        assert_eq!(sum.data_points[0].attributes, vec![KeyValue::new("keep", "a")]);
    }

    #[test]
    fn delta_windows_are_contiguous() {
        let fns = AggregateBuilder::<u64>::new(Temporality::Delta, None).sum(true);
        fns.measure.call(1, &[]);

        let first_end = SystemTime::now();
        let first = sum_of(fns.collect.call(first_end));
        let second_end = SystemTime::now();
        let second = sum_of(fns.collect.call(second_end));

        assert_eq!(first.data_points[0].time, first_end);
        assert_eq!(second.data_points[0].start_time, first_end);
        assert_eq!(second.data_points[0].time, second_end);
    }

    #[test]
    fn cumulative_start_is_fixed() {
        let fns = AggregateBuilder::<u64>::new(Temporality::Cumulative, None).sum(true);
        fns.measure.call(1, &[]);
        let first = sum_of(fns.collect.call(SystemTime::now()));
        fns.measure.call(1, &[]);
        let second = sum_of(fns.collect.call(SystemTime::now()));

        assert_eq!(first.data_points[0].start_time, second.data_points[0].start_time);
        assert_eq!(second.data_points[0].value, 2);
    }
}
