//! Types for delivery of pre-aggregated metric time series data.

use std::{borrow::Cow, time::SystemTime};

use otel_core::{InstrumentationScope, KeyValue};

use crate::Resource;

use super::Temporality;

/// Everything one collection produced, grouped by scope.
#[derive(Clone, Debug, Default)]
pub struct ResourceMetrics {
    /// Resource of the provider that owns the pipeline.
    pub resource: Resource,
    /// One entry per meter scope that reported data.
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl ResourceMetrics {
    /// Iterates over the metrics of every scope that produced data.
    pub fn scope_metrics(&self) -> impl Iterator<Item = &ScopeMetrics> {
        self.scope_metrics.iter()
    }
}

/// Metrics reported by the meters sharing one [InstrumentationScope].
#[derive(Clone, Default, Debug)]
pub struct ScopeMetrics {
    /// Scope of the meter.
    pub scope: InstrumentationScope,
    /// Streams with at least one data point.
    pub metrics: Vec<Metric>,
}

impl ScopeMetrics {
    /// Iterates over the metrics of this scope.
    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }
}

/// One output stream, identified by its name, description and unit.
#[derive(Clone, Debug)]
pub struct Metric {
    /// Stream name, after any view renaming.
    pub name: Cow<'static, str>,
    /// Stream description.
    pub description: Cow<'static, str>,
    /// Stream unit.
    pub unit: Cow<'static, str>,
    /// Points of the stream, tagged by value type.
    pub data: AggregatedMetrics,
}

/// Stream data, split by the numeric type of the instrument.
#[derive(Debug, Clone)]
pub enum AggregatedMetrics {
    /// Floating point instruments.
    F64(MetricData<f64>),
    /// Unsigned integer instruments.
    U64(MetricData<u64>),
    /// Signed integer instruments.
    I64(MetricData<i64>),
}

/// Stream data, split by aggregation.
#[derive(Debug, Clone)]
pub enum MetricData<T> {
    /// Last value per attribute set.
    Gauge(Gauge<T>),
    /// Running sums.
    Sum(Sum<T>),
    /// Explicit bucket histograms.
    Histogram(Histogram<T>),
    /// Base-2 exponential histograms.
    ExponentialHistogram(ExponentialHistogram<T>),
}

impl<T> MetricData<T> {
    /// Number of data points carried by this aggregation.
    pub fn len(&self) -> usize {
        match self {
            MetricData::Gauge(g) => g.data_points.len(),
            MetricData::Sum(s) => s.data_points.len(),
            MetricData::Histogram(h) => h.data_points.len(),
            MetricData::ExponentialHistogram(h) => h.data_points.len(),
        }
    }

    /// Returns `true` when no attribute set produced a point.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<MetricData<f64>> for AggregatedMetrics {
    fn from(value: MetricData<f64>) -> Self {
        AggregatedMetrics::F64(value)
    }
}

impl From<MetricData<i64>> for AggregatedMetrics {
    fn from(value: MetricData<i64>) -> Self {
        AggregatedMetrics::I64(value)
    }
}

impl From<MetricData<u64>> for AggregatedMetrics {
    fn from(value: MetricData<u64>) -> Self {
        AggregatedMetrics::U64(value)
    }
}

impl<T> From<Gauge<T>> for MetricData<T> {
    fn from(value: Gauge<T>) -> Self {
        MetricData::Gauge(value)
    }
}

impl<T> From<Sum<T>> for MetricData<T> {
    fn from(value: Sum<T>) -> Self {
        MetricData::Sum(value)
    }
}

impl<T> From<Histogram<T>> for MetricData<T> {
    fn from(value: Histogram<T>) -> Self {
        MetricData::Histogram(value)
    }
}

impl<T> From<ExponentialHistogram<T>> for MetricData<T> {
    fn from(value: ExponentialHistogram<T>) -> Self {
        MetricData::ExponentialHistogram(value)
    }
}

/// The last value seen for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint<T> {
    /// Attribute set identifying the series.
    pub attributes: Vec<KeyValue>,
    /// Gauges carry no start time.
    pub start_time: Option<SystemTime>,
    /// Collection time.
    pub time: SystemTime,
    /// Aggregated value.
    pub value: T,
}

/// Points of a last-value aggregation.
#[derive(Debug, Clone)]
pub struct Gauge<T> {
    /// One point per attribute set.
    pub data_points: Vec<GaugeDataPoint<T>>,
}

/// The sum accumulated for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint<T> {
    /// Attribute set identifying the series.
    pub attributes: Vec<KeyValue>,
    /// Start of the window (delta) or of the whole series (cumulative).
    pub start_time: SystemTime,
    /// End of the window, shared by every point of one collection.
    pub time: SystemTime,
    /// Aggregated value.
    pub value: T,
}

/// Points of a sum aggregation.
#[derive(Debug, Clone)]
pub struct Sum<T> {
    /// One point per attribute set.
    pub data_points: Vec<SumDataPoint<T>>,
    /// Whether points cover the last interval or the whole series.
    pub temporality: Temporality,
    /// `true` for counters.
    pub is_monotonic: bool,
}

/// Points of an explicit bucket histogram aggregation.
#[derive(Debug, Clone)]
pub struct Histogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<HistogramDataPoint<T>>,
    /// Whether points cover the last interval or the whole series.
    pub temporality: Temporality,
}

/// Bucketed distribution for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// Attribute set identifying the series.
    pub attributes: Vec<KeyValue>,
    /// Start of the accumulation.
    pub start_time: SystemTime,
    /// End of the accumulation.
    pub time: SystemTime,
    /// Number of recorded measurements.
    pub count: u64,
    /// Inclusive upper bounds, without the implicit `+inf` bucket.
    pub bounds: Vec<f64>,
    /// Per bucket counts, one longer than `bounds`.
    pub bucket_counts: Vec<u64>,
    /// Smallest measurement, if tracked.
    pub min: Option<T>,
    /// Largest measurement, if tracked.
    pub max: Option<T>,
    /// Sum of all measurements.
    pub sum: T,
}

/// Points of an exponential histogram aggregation.
#[derive(Debug, Clone)]
pub struct ExponentialHistogram<T> {
    /// One point per attribute set.
    pub data_points: Vec<ExponentialHistogramDataPoint<T>>,
    /// Whether points cover the last interval or the whole series.
    pub temporality: Temporality,
}

/// Exponentially bucketed distribution for one attribute set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramDataPoint<T> {
    /// Attribute set identifying the series.
    pub attributes: Vec<KeyValue>,
    /// Start of the accumulation.
    pub start_time: SystemTime,
    /// End of the accumulation.
    pub time: SystemTime,
    /// Number of recorded measurements.
    pub count: usize,
    /// Smallest measurement, if tracked.
    pub min: Option<T>,
    /// Largest measurement, if tracked.
    pub max: Option<T>,
    /// Sum of all measurements.
    pub sum: T,
    /// Resolution. Bucket boundaries are powers of `2 ^ (2 ^ -scale)`.
    pub scale: i8,
    /// Measurements equal to zero.
    pub zero_count: u64,
    /// Buckets for positive measurements.
    pub positive_bucket: ExponentialBucket,
    /// Buckets for the magnitude of negative measurements.
    pub negative_bucket: ExponentialBucket,
    /// The width of the zero region. Always `0.0`.
    pub zero_threshold: f64,
}

/// Contiguous run of exponential buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBucket {
    /// Index of the bucket stored in `counts[0]`.
    pub offset: i32,
    /// `counts[i]` holds values in `(base^(offset+i), base^(offset+i+1)]`.
    pub counts: Vec<u64>,
}
