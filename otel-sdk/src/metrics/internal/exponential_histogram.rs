use std::{f64::consts::LOG2_E, mem::replace, time::SystemTime};

use otel_core::{otel_debug, KeyValue};

use crate::metrics::data::{self, ExponentialBucket, ExponentialHistogramDataPoint, MetricData};
use crate::metrics::Temporality;

use super::aggregate::{AggregateTimeInitiator, Aggregator};
use super::{Number, Tracker, ValueMap};

pub(crate) const EXPO_MAX_SCALE: i8 = 20;
pub(crate) const EXPO_MIN_SCALE: i8 = -10;

/// A single data point in an exponential histogram.
#[derive(Clone, Debug, PartialEq)]
struct ExpoHistogramDataPoint<T> {
    count: usize,
    min: T,
    max: T,
    sum: T,

    max_size: i32,
    record_min_max: bool,
    record_sum: bool,

    scale: i8,

    pos_buckets: ExpoBuckets,
    neg_buckets: ExpoBuckets,
    zero_count: u64,
}

impl<T: Number> ExpoHistogramDataPoint<T> {
    fn new(config: &ExpoConfig) -> Self {
        ExpoHistogramDataPoint {
            count: 0,
            min: T::max(),
            max: T::min(),
            sum: T::default(),
            max_size: config.max_size,
            record_min_max: config.record_min_max,
            record_sum: config.record_sum,
            scale: config.max_scale,
            pos_buckets: ExpoBuckets::default(),
            neg_buckets: ExpoBuckets::default(),
            zero_count: 0,
        }
    }

    /// Adds a new measurement to the histogram.
    ///
    /// It will rescale the buckets if needed.
    fn record(&mut self, v: T) {
        self.count += 1;

        if self.record_min_max {
            if v < self.min {
                self.min = v;
            }
            if v > self.max {
                self.max = v;
            }
        }
        if self.record_sum {
            self.sum += v;
        }

        let abs_v = v.into_float().abs();

        if abs_v == 0.0 {
            self.zero_count += 1;
            return;
        }

        let mut bin = self.get_bin(abs_v);

        let v_is_negative = v < T::default();

        // If the new bin would make the counts larger than `max_scale`, we need to
        // downscale current measurements.
        let scale_delta = {
            let bucket = if v_is_negative {
                &self.neg_buckets
            } else {
                &self.pos_buckets
            };

            scale_change(
                self.max_size,
                bin,
                bucket.start_bin,
                bucket.counts.len() as i32,
            )
        };
        if scale_delta > 0 {
            if (self.scale - scale_delta as i8) < EXPO_MIN_SCALE {
                // With a scale of -10 there is only two buckets for the whole range of f64 values.
                // This can only happen if there is a max size of 1.
                otel_debug!(
                    name: "ExponentialHistogramDataPoint.Scale.Underflow",
                    current_scale = self.scale,
                    scale_delta = scale_delta,
                    max_size = self.max_size,
                    min_scale = EXPO_MIN_SCALE,
                    value = abs_v,
                    message = "The measurement will be dropped due to scale underflow. Check the histogram configuration"
                );
                return;
            }
            self.downscale(scale_delta);

            bin = self.get_bin(abs_v);
        }

        if v_is_negative {
            self.neg_buckets.record(bin)
        } else {
            self.pos_buckets.record(bin)
        }
    }

    /// the bin `v` should be recorded into.
    fn get_bin(&self, v: f64) -> i32 {
        let (frac, exp) = frexp(v);
        if self.scale <= 0 {
            // With negative scale `frac` is always 1 power of two higher than we want.
            let mut correction = 1;
            if frac == 0.5 {
                // If `v` is an exact power of two, `frac` will be `0.5` and the exp
                // will be then be two higher than we want.
                correction = 2;
            }
            return (exp - correction) >> -self.scale;
        }
        (exp << self.scale) + (frac.ln() * SCALE_FACTORS[self.scale as usize]) as i32 - 1
    }

    fn downscale(&mut self, delta: u32) {
        self.scale -= delta as i8;
        self.pos_buckets.downscale(delta);
        self.neg_buckets.downscale(delta);
    }

    /// Folds `other` into `self`.
    ///
    /// Both sides are brought to the smaller of the two scales, then lowered
    /// further if the combined bucket range would not fit `max_size`.
    fn merge(&mut self, other: &ExpoHistogramDataPoint<T>) {
        if other.count == 0 {
            return;
        }

        let mut other = other.clone();
        if other.scale < self.scale {
            self.downscale((self.scale - other.scale) as u32);
        } else if other.scale > self.scale {
            other.downscale((other.scale - self.scale) as u32);
        }

        let extra = merged_scale_change(self.max_size, &self.pos_buckets, &other.pos_buckets).max(
            merged_scale_change(self.max_size, &self.neg_buckets, &other.neg_buckets),
        );
        let extra = extra.min((self.scale - EXPO_MIN_SCALE) as u32);
        if extra > 0 {
            self.downscale(extra);
            other.downscale(extra);
        }

        self.pos_buckets.merge(&other.pos_buckets);
        self.neg_buckets.merge(&other.neg_buckets);
        self.zero_count += other.zero_count;
        self.count += other.count;
        self.sum += other.sum;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
    }

    fn to_data_point(
        &self,
        attributes: Vec<KeyValue>,
        start_time: SystemTime,
        time: SystemTime,
    ) -> ExponentialHistogramDataPoint<T> {
        let has_min_max = self.record_min_max && self.count > 0;
        ExponentialHistogramDataPoint {
            attributes,
            start_time,
            time,
            count: self.count,
            min: has_min_max.then_some(self.min),
            max: has_min_max.then_some(self.max),
            sum: if self.record_sum {
                self.sum
            } else {
                T::default()
            },
            scale: self.scale,
            zero_count: self.zero_count,
            positive_bucket: ExponentialBucket {
                offset: self.pos_buckets.start_bin,
                counts: self.pos_buckets.counts.clone(),
            },
            negative_bucket: ExponentialBucket {
                offset: self.neg_buckets.start_bin,
                counts: self.neg_buckets.counts.clone(),
            },
            zero_threshold: 0.0,
        }
    }
}

/// The magnitude of the scale change needed to fit bin in the bucket.
///
/// If no scale change is needed 0 is returned.
fn scale_change(max_size: i32, bin: i32, start_bin: i32, length: i32) -> u32 {
    if length == 0 {
        // No need to rescale if there are no buckets.
        return 0;
    }

    let mut low = start_bin;
    let mut high = bin;
    if start_bin >= bin {
        low = bin;
        high = start_bin + length - 1;
    }

    shrink_to_fit(max_size, low, high)
}

/// The scale change needed for the union of two bucket ranges to fit.
fn merged_scale_change(max_size: i32, a: &ExpoBuckets, b: &ExpoBuckets) -> u32 {
    if a.counts.is_empty() || b.counts.is_empty() {
        return 0;
    }

    let low = a.start_bin.min(b.start_bin);
    let high = a.end_bin().max(b.end_bin());
    shrink_to_fit(max_size, low, high)
}

fn shrink_to_fit(max_size: i32, mut low: i32, mut high: i32) -> u32 {
    let mut count = 0u32;
    while high - low >= max_size {
        low >>= 1;
        high >>= 1;
        count += 1;

        if count > (EXPO_MAX_SCALE - EXPO_MIN_SCALE) as u32 {
            return count;
        }
    }

    count
}

/// Constants used in calculating the logarithm index.
const SCALE_FACTORS: [f64; 21] = [
    LOG2_E * 1.0,
    LOG2_E * 2.0,
    LOG2_E * 4.0,
    LOG2_E * 8.0,
    LOG2_E * 16.0,
    LOG2_E * 32.0,
    LOG2_E * 64.0,
    LOG2_E * 128.0,
    LOG2_E * 256.0,
    LOG2_E * 512.0,
    LOG2_E * 1024.0,
    LOG2_E * 2048.0,
    LOG2_E * 4096.0,
    LOG2_E * 8192.0,
    LOG2_E * 16384.0,
    LOG2_E * 32768.0,
    LOG2_E * 65536.0,
    LOG2_E * 131072.0,
    LOG2_E * 262144.0,
    LOG2_E * 524288.0,
    LOG2_E * 1048576.0,
];

/// Breaks the number into a normalized fraction and a base-2 exponent.
///
/// This impl is necessary as rust removed this functionality from std in
/// <https://github.com/rust-lang/rust/pull/41437>
#[inline(always)]
fn frexp(x: f64) -> (f64, i32) {
    let mut y = x.to_bits();
    let ee = ((y >> 52) & 0x7ff) as i32;

    if ee == 0 {
        if x != 0.0 {
            let x1p64 = f64::from_bits(0x43f0000000000000);
            let (x, e) = frexp(x * x1p64);
            return (x, e - 64);
        }
        return (x, 0);
    } else if ee == 0x7ff {
        return (x, 0);
    }

    let e = ee - 0x3fe;
    y &= 0x800fffffffffffff;
    y |= 0x3fe0000000000000;

    (f64::from_bits(y), e)
}

/// A set of buckets in an exponential histogram.
#[derive(Clone, Default, Debug, PartialEq)]
struct ExpoBuckets {
    start_bin: i32,
    counts: Vec<u64>,
}

impl ExpoBuckets {
    fn end_bin(&self) -> i32 {
        self.start_bin + self.counts.len() as i32 - 1
    }

    /// Increments the count for the given bin, and expands the buckets if needed.
    ///
    /// Size changes must be done before calling this function.
    fn record(&mut self, bin: i32) {
        if self.counts.is_empty() {
            self.counts = vec![1];
            self.start_bin = bin;
            return;
        }

        let end_bin = self.end_bin();

        // if the new bin is inside the current range
        if bin >= self.start_bin && bin <= end_bin {
            self.counts[(bin - self.start_bin) as usize] += 1;
            return;
        }

        // if the new bin is before the current start, prepend the slots in `self.counts`
        if bin < self.start_bin {
            let mut zeroes = vec![0; (end_bin - bin + 1) as usize];
            let shift = (self.start_bin - bin) as usize;
            zeroes[shift..].copy_from_slice(&self.counts);
            self.counts = zeroes;
            self.counts[0] = 1;
            self.start_bin = bin;
        } else {
            // the new bin is after the end, initialize the slots up to the new bin
            self.counts.resize((bin - self.start_bin + 1) as usize, 0);
            self.counts[(bin - self.start_bin) as usize] = 1;
        }
    }

    /// Shrinks a bucket by a factor of 2*s.
    ///
    /// It will sum counts into the correct lower resolution bucket.
    fn downscale(&mut self, delta: u32) {
        // Example
        // delta = 2
        // original offset: -6
        // counts: [ 3,  1,  2,  3,  4,  5, 6, 7, 8, 9, 10]
        // bins:    -6  -5, -4, -3, -2, -1, 0, 1, 2, 3, 4
        // new bins:-2, -2, -1, -1, -1, -1, 0, 0, 0, 0, 1
        // new offset: -2
        // new counts: [4, 14, 30, 10]

        if self.counts.len() <= 1 || delta < 1 {
            self.start_bin >>= delta;
            return;
        }

        let steps = 1 << delta;
        let mut offset = self.start_bin % steps;
        offset = (offset + steps) % steps; // to make offset positive
        for i in 1..self.counts.len() {
            let idx = i + offset as usize;
            if idx % steps as usize == 0 {
                self.counts[idx / steps as usize] = self.counts[i];
                continue;
            }
            self.counts[idx / steps as usize] += self.counts[i];
        }

        let last_idx = (self.counts.len() as i32 - 1 + offset) / steps;
        self.counts.truncate(last_idx as usize + 1);
        self.start_bin >>= delta;
    }

    /// Adds the counts of `other`, which must be at the same scale.
    fn merge(&mut self, other: &ExpoBuckets) {
        if other.counts.is_empty() {
            return;
        }
        if self.counts.is_empty() {
            *self = other.clone();
            return;
        }

        let start = self.start_bin.min(other.start_bin);
        let end = self.end_bin().max(other.end_bin());
        let mut counts = vec![0; (end - start + 1) as usize];
        for buckets in [&*self, other] {
            let shift = (buckets.start_bin - start) as usize;
            for (i, count) in buckets.counts.iter().enumerate() {
                counts[shift + i] += count;
            }
        }

        self.start_bin = start;
        self.counts = counts;
    }
}

struct ExpoConfig {
    max_size: i32,
    max_scale: i8,
    record_min_max: bool,
    record_sum: bool,
}

struct ExpoTracker<T> {
    window: ExpoHistogramDataPoint<T>,
    cumulative: Option<ExpoHistogramDataPoint<T>>,
}

impl<T: Number> Tracker for ExpoTracker<T> {
    type Config = ExpoConfig;
    type Measurement = T;

    fn create(config: &ExpoConfig) -> Self {
        ExpoTracker {
            window: ExpoHistogramDataPoint::new(config),
            cumulative: None,
        }
    }

    fn update(&mut self, value: T) {
        self.window.record(value)
    }
}

/// An aggregator that summarizes a set of measurements as an exponential
/// histogram.
///
/// Each window starts at `max_scale` and only ever scales down. Cumulative
/// output is the merge of every window so far.
pub(crate) struct ExpoHistogram<T: Number> {
    value_map: ValueMap<ExpoTracker<T>>,
    time: AggregateTimeInitiator,
}

impl<T: Number> ExpoHistogram<T> {
    /// Create a new exponential histogram.
    pub(crate) fn new(
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
        record_sum: bool,
    ) -> Self {
        ExpoHistogram {
            value_map: ValueMap::new(ExpoConfig {
                max_size: max_size as i32,
                max_scale,
                record_min_max,
                record_sum,
            }),
            time: AggregateTimeInitiator::default(),
        }
    }
}

impl<T: Number> Aggregator<T> for ExpoHistogram<T> {
    fn aggregate(&self, value: T, attrs: &[KeyValue]) {
        let f_value = value.into_float();
        // Ignore NaN and infinity.
        if f_value.is_infinite() || f_value.is_nan() {
            return;
        }

        self.value_map.measure(value, attrs);
    }

    fn collect(&self, temporality: Temporality, now: SystemTime) -> Option<MetricData<T>> {
        let time = self.time.window(temporality, now);
        let config = self.value_map.config();

        let data_points = self.value_map.collect(|attributes, tracker| {
            let window = replace(&mut tracker.window, ExpoHistogramDataPoint::new(config));
            match temporality {
                Temporality::Delta => (window.count > 0).then(|| {
                    window.to_data_point(attributes.to_vec(), time.start, time.current)
                }),
                Temporality::Cumulative => {
                    let cumulative = tracker
                        .cumulative
                        .get_or_insert_with(|| ExpoHistogramDataPoint::new(config));
                    cumulative.merge(&window);
                    (cumulative.count > 0).then(|| {
                        cumulative.to_data_point(attributes.to_vec(), time.start, time.current)
                    })
                }
            }
        });

        if data_points.is_empty() {
            return None;
        }

        Some(
            data::ExponentialHistogram {
                data_points,
                temporality,
            }
            .into(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(max_size: i32) -> ExpoConfig {
        ExpoConfig {
            max_size,
            max_scale: 20,
            record_min_max: true,
            record_sum: true,
        }
    }

    fn buckets(start_bin: i32, counts: Vec<u64>) -> ExpoBuckets {
        ExpoBuckets { start_bin, counts }
    }

    #[rstest]
    #[case(4, vec![2.0, 4.0, 1.0], buckets(-1, vec![1, 1, 1]), 0)]
    #[case(4, vec![4.0, 4.0, 4.0, 2.0, 16.0, 1.0], buckets(-1, vec![1, 4, 1]), -1)]
    #[case(2, vec![1.0, 2.0, 4.0], buckets(-1, vec![1, 2]), -1)]
    #[case(2, vec![4.0, 2.0, 1.0], buckets(-1, vec![1, 2]), -1)]
    #[case(2, vec![2.0, 1.0, 4.0], buckets(-1, vec![1, 2]), -1)]
    fn record_downscales_to_fit(
        #[case] max_size: i32,
        #[case] values: Vec<f64>,
        #[case] expected: ExpoBuckets,
        #[case] expected_scale: i8,
    ) {
        let mut dp = ExpoHistogramDataPoint::<f64>::new(&config(max_size));
        for v in values {
            dp.record(v);
            dp.record(-v);
        }

        assert_eq!(expected, dp.pos_buckets, "positive buckets");
        assert_eq!(expected, dp.neg_buckets, "negative buckets");
        assert_eq!(expected_scale, dp.scale, "scale");
    }

    #[test]
    fn record_tracks_min_max_sum_and_zero() {
        let mut dp = ExpoHistogramDataPoint::<i64>::new(&config(160));
        for v in [3, -7, 0, 12] {
            dp.record(v);
        }
        assert_eq!(dp.count, 4);
        assert_eq!(dp.zero_count, 1);
        assert_eq!(dp.min, -7);
        assert_eq!(dp.max, 12);
        assert_eq!(dp.sum, 8);
    }

    #[test]
    fn record_limits() {
        // floor(log2(value) * 2^20) computed with an arbitrary precision calculator
        let mut fdp = ExpoHistogramDataPoint::<f64>::new(&config(4));
        fdp.record(f64::MAX);
        assert_eq!(fdp.pos_buckets.start_bin, 1073741823);

        let mut fdp = ExpoHistogramDataPoint::<f64>::new(&config(4));
        fdp.record(f64::MIN_POSITIVE);
        assert_eq!(fdp.pos_buckets.start_bin, -1071644673);

        let mut idp = ExpoHistogramDataPoint::<i64>::new(&config(4));
        idp.record(i64::MAX);
        assert_eq!(idp.pos_buckets.start_bin, 66060287);
    }

    #[rstest]
    #[case::empty(buckets(0, vec![]), 3, buckets(0, vec![]))]
    #[case::single(buckets(50, vec![7]), 4, buckets(3, vec![7]))]
    #[case::zero_scale(buckets(50, vec![7, 5]), 0, buckets(50, vec![7, 5]))]
    #[case::aligned(buckets(0, vec![1, 2, 3, 4]), 1, buckets(0, vec![3, 7]))]
    #[case::unaligned(buckets(-6, vec![3, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), 2, buckets(-2, vec![4, 14, 30, 10]))]
    #[case::odd_start(buckets(1, vec![1, 2, 3]), 1, buckets(0, vec![1, 5]))]
    fn bucket_downscale(#[case] mut bucket: ExpoBuckets, #[case] delta: u32, #[case] want: ExpoBuckets) {
        bucket.downscale(delta);
        assert_eq!(want, bucket);
    }

    #[test]
    fn bucket_record_grows_both_ways() {
        let mut b = ExpoBuckets::default();
        b.record(5);
        b.record(7);
        b.record(3);
        b.record(5);
        assert_eq!(b, buckets(3, vec![1, 0, 2, 0, 1]));
    }

    #[rstest]
    #[case::fits(4, 0, 3, 1, 0)]
    #[case::one_step(4, 0, 4, 1, 1)]
    #[case::below_start(4, -1, 1, 3, 1)]
    #[case::empty(4, 1_000, 0, 0, 0)]
    fn scale_change_rescaling(
        #[case] max_size: i32,
        #[case] bin: i32,
        #[case] start_bin: i32,
        #[case] length: i32,
        #[case] want: u32,
    ) {
        assert_eq!(scale_change(max_size, bin, start_bin, length), want);
    }

    #[test]
    fn merge_at_same_scale_adds_counts() {
        let mut a = ExpoHistogramDataPoint::<f64>::new(&config(4));
        let mut b = ExpoHistogramDataPoint::<f64>::new(&config(4));
        for v in [2.0, 4.0, 1.0] {
            a.record(v);
            b.record(v);
        }

        a.merge(&b);
        assert_eq!(a.scale, 0);
        assert_eq!(a.pos_buckets, buckets(-1, vec![2, 2, 2]));
        assert_eq!(a.count, 6);
        assert_eq!(a.sum, 14.0);
    }

    #[test]
    fn merge_downscales_finer_side() {
        let mut coarse = ExpoHistogramDataPoint::<f64>::new(&config(4));
        for v in [2.0, 4.0, 1.0] {
            coarse.record(v);
        }
        let mut fine = ExpoHistogramDataPoint::<f64>::new(&config(4));
        fine.record(2.0);
        assert_eq!(fine.scale, 20);

        coarse.merge(&fine);
        assert_eq!(coarse.scale, 0);
        assert_eq!(coarse.pos_buckets, buckets(-1, vec![1, 2, 1]));

        // and the other way around
        let mut fine = ExpoHistogramDataPoint::<f64>::new(&config(4));
        fine.record(2.0);
        let mut coarse = ExpoHistogramDataPoint::<f64>::new(&config(4));
        for v in [2.0, 4.0, 1.0] {
            coarse.record(v);
        }
        fine.merge(&coarse);
        assert_eq!(fine.scale, 0);
        assert_eq!(fine.pos_buckets, buckets(-1, vec![1, 2, 1]));
    }

    #[test]
    fn merge_keeps_range_within_max_size() {
        let mut low = ExpoHistogramDataPoint::<f64>::new(&config(2));
        low.record(1.0);
        let mut high = ExpoHistogramDataPoint::<f64>::new(&config(2));
        high.record(1024.0);

        low.merge(&high);
        assert!(low.pos_buckets.counts.len() <= 2);
        assert_eq!(low.pos_buckets.counts.iter().sum::<u64>(), 2);
    }

    #[test]
    fn delta_resets_scale_between_windows() {
        let hist = ExpoHistogram::<f64>::new(4, 20, true, true);
        for v in [1.0, 1000.0] {
            hist.aggregate(v, &[]);
        }
        let first = match hist.collect(Temporality::Delta, SystemTime::now()) {
            Some(MetricData::ExponentialHistogram(h)) => h.data_points,
            other => panic!("unexpected data: {other:?}"),
        };
        assert!(first[0].scale < 20);

        hist.aggregate(2.0, &[]);
        let second = match hist.collect(Temporality::Delta, SystemTime::now()) {
            Some(MetricData::ExponentialHistogram(h)) => h.data_points,
            other => panic!("unexpected data: {other:?}"),
        };
        assert_eq!(second[0].scale, 20);
        assert_eq!(second[0].count, 1);

        assert!(hist.collect(Temporality::Delta, SystemTime::now()).is_none());
    }

    #[test]
    fn cumulative_accumulates_across_windows() {
        let hist = ExpoHistogram::<u64>::new(160, 20, true, true);
        hist.aggregate(0, &[]);
        hist.aggregate(8, &[]);
        let _ = hist.collect(Temporality::Cumulative, SystemTime::now());
        hist.aggregate(3, &[]);

        match hist.collect(Temporality::Cumulative, SystemTime::now()) {
            Some(MetricData::ExponentialHistogram(h)) => {
                let p = &h.data_points[0];
                assert_eq!(p.count, 3);
                assert_eq!(p.zero_count, 1);
                assert_eq!(p.sum, 11);
                assert_eq!(p.min, Some(0));
                assert_eq!(p.max, Some(8));
                assert_eq!(p.positive_bucket.counts.iter().sum::<u64>(), 2);
                assert_eq!(h.temporality, Temporality::Cumulative);
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn infinite_values_are_ignored() {
        let hist = ExpoHistogram::<f64>::new(160, 20, true, true);
        hist.aggregate(f64::INFINITY, &[]);
        hist.aggregate(f64::NAN, &[]);
        assert!(hist.collect(Temporality::Delta, SystemTime::now()).is_none());
    }
}
