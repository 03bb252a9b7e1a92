use core::fmt;
use std::{borrow::Cow, sync::Arc};

use otel_core::{
    metrics::{
        noop::NoopSyncInstrument, AsyncInstrumentBuilder, Callback, Counter, Gauge, Histogram,
        HistogramBuilder, InstrumentBuilder, InstrumentProvider, ObservableCounter,
        ObservableGauge, ObservableUpDownCounter, SyncInstrument, UpDownCounter,
    },
    otel_debug, otel_warn, InstrumentationScope,
};

use crate::metrics::{
    aggregation::Aggregation,
    instrument::{Instrument, InstrumentKind, Observable, ResolvedMeasures},
    internal::Number,
    pipeline::{Pipelines, Resolver},
    MetricError, MetricResult,
};

// maximum length of instrument name
const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
// maximum length of instrument unit name
const INSTRUMENT_UNIT_NAME_MAX_LENGTH: usize = 63;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

const INSTRUMENT_NAME_EMPTY: &str = "instrument name must be non-empty";
const INSTRUMENT_NAME_LENGTH: &str = "instrument name must be at most 255 characters";
const INSTRUMENT_NAME_INVALID_CHAR: &str =
    "characters in instrument name must be ASCII alphanumeric, '_', '.', '-' or '/'";
const INSTRUMENT_NAME_FIRST_ALPHABETIC: &str =
    "instrument name must start with an alphabetic character";
const INSTRUMENT_UNIT_LENGTH: &str = "instrument unit must be at most 63 characters";
const INSTRUMENT_UNIT_INVALID_CHAR: &str = "characters in instrument unit must be ASCII";

/// Handles the creation and coordination of all metric instruments.
///
/// A meter represents a single instrumentation scope; all metric telemetry
/// produced by an instrumentation scope will use metric instruments from a
/// single meter.
///
/// Instruments with an invalid name or unit are logged and replaced by
/// instruments that discard their measurements.
pub struct SdkMeter {
    scope: InstrumentationScope,
    pipes: Arc<Pipelines>,
    u64_resolver: Resolver<u64>,
    i64_resolver: Resolver<i64>,
    f64_resolver: Resolver<f64>,
}

impl fmt::Debug for SdkMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeter")
            .field("scope", &self.scope)
            .finish()
    }
}

impl SdkMeter {
    pub(crate) fn new(scope: InstrumentationScope, pipes: Arc<Pipelines>) -> Self {
        // one cache per meter so u64 and f64 instruments of the same name
        // are reported as duplicates
        let stream_ids = Default::default();

        SdkMeter {
            scope,
            pipes: Arc::clone(&pipes),
            u64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&stream_ids)),
            i64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&stream_ids)),
            f64_resolver: Resolver::new(pipes, stream_ids),
        }
    }

    fn instrument(
        &self,
        kind: InstrumentKind,
        name: Cow<'static, str>,
        description: Option<Cow<'static, str>>,
        unit: Option<Cow<'static, str>>,
    ) -> Option<Instrument> {
        if let Err(err) = validate_instrument_config(&name, unit.as_deref()) {
            otel_warn!(
                name: "InstrumentCreationFailed",
                meter_name = self.scope.name(),
                instrument_name = name.as_ref(),
                message = "Measurements from this instrument will be ignored.",
                reason = format!("{err}")
            );
            return None;
        }

        Some(Instrument {
            name,
            description: description.unwrap_or_default(),
            kind: Some(kind),
            unit: unit.unwrap_or_default(),
            scope: self.scope.clone(),
        })
    }

    fn sync_instrument<T: Number>(
        &self,
        resolver: &Resolver<T>,
        kind: InstrumentKind,
        builder: InstrumentBuilder<'_, impl Sized>,
    ) -> Arc<dyn SyncInstrument<T> + Send + Sync> {
        match self.instrument(kind, builder.name, builder.description, builder.unit) {
            Some(inst) => Arc::new(ResolvedMeasures {
                measures: resolver.measures(inst, None),
            }),
            None => Arc::new(NoopSyncInstrument::new()),
        }
    }

    fn histogram<T: Number>(
        &self,
        resolver: &Resolver<T>,
        builder: HistogramBuilder<'_, Histogram<T>>,
    ) -> Histogram<T> {
        let Some(inst) = self.instrument(
            InstrumentKind::Histogram,
            builder.name,
            builder.description,
            builder.unit,
        ) else {
            return Histogram::new(Arc::new(NoopSyncInstrument::new()));
        };

        let boundaries = builder.boundaries.filter(|boundaries| {
            let advised = Aggregation::ExplicitBucketHistogram {
                boundaries: boundaries.clone(),
                record_min_max: true,
            };
            match advised.validate() {
                Ok(()) => true,
                Err(err) => {
                    otel_warn!(
                        name: "Histogram.InvalidBoundaries",
                        instrument_name = inst.name.as_ref(),
                        message = "The default boundaries are used instead.",
                        reason = format!("{err}")
                    );
                    false
                }
            }
        });

        Histogram::new(Arc::new(ResolvedMeasures {
            measures: resolver.measures(inst, boundaries),
        }))
    }

    fn observable<T: Number>(
        &self,
        resolver: &Resolver<T>,
        kind: InstrumentKind,
        builder: AsyncInstrumentBuilder<'_, impl Sized, T>,
    ) {
        let Some(inst) = self.instrument(kind, builder.name, builder.description, builder.unit)
        else {
            return;
        };

        let measures = resolver.measures(inst, None);
        if measures.is_empty() {
            return;
        }

        let observable = Arc::new(Observable::new(measures));
        for callback in builder.callbacks {
            self.register(Arc::clone(&observable), callback);
        }
    }

    fn register<T: Number>(&self, observable: Arc<Observable<T>>, callback: Callback<T>) {
        otel_debug!(
            name: "Meter.CallbackRegistered",
            meter_name = self.scope.name(),
        );
        self.pipes
            .register_callback(move || callback(observable.as_ref()));
    }
}

impl InstrumentProvider for SdkMeter {
    fn u64_counter(&self, builder: InstrumentBuilder<'_, Counter<u64>>) -> Counter<u64> {
        Counter::new(self.sync_instrument(&self.u64_resolver, InstrumentKind::Counter, builder))
    }

    fn f64_counter(&self, builder: InstrumentBuilder<'_, Counter<f64>>) -> Counter<f64> {
        Counter::new(self.sync_instrument(&self.f64_resolver, InstrumentKind::Counter, builder))
    }

    fn i64_up_down_counter(
        &self,
        builder: InstrumentBuilder<'_, UpDownCounter<i64>>,
    ) -> UpDownCounter<i64> {
        UpDownCounter::new(self.sync_instrument(
            &self.i64_resolver,
            InstrumentKind::UpDownCounter,
            builder,
        ))
    }

    fn f64_up_down_counter(
        &self,
        builder: InstrumentBuilder<'_, UpDownCounter<f64>>,
    ) -> UpDownCounter<f64> {
        UpDownCounter::new(self.sync_instrument(
            &self.f64_resolver,
            InstrumentKind::UpDownCounter,
            builder,
        ))
    }

    fn u64_gauge(&self, builder: InstrumentBuilder<'_, Gauge<u64>>) -> Gauge<u64> {
        Gauge::new(self.sync_instrument(&self.u64_resolver, InstrumentKind::Gauge, builder))
    }

    fn i64_gauge(&self, builder: InstrumentBuilder<'_, Gauge<i64>>) -> Gauge<i64> {
        Gauge::new(self.sync_instrument(&self.i64_resolver, InstrumentKind::Gauge, builder))
    }

    fn f64_gauge(&self, builder: InstrumentBuilder<'_, Gauge<f64>>) -> Gauge<f64> {
        Gauge::new(self.sync_instrument(&self.f64_resolver, InstrumentKind::Gauge, builder))
    }

    fn u64_histogram(&self, builder: HistogramBuilder<'_, Histogram<u64>>) -> Histogram<u64> {
        self.histogram(&self.u64_resolver, builder)
    }

    fn f64_histogram(&self, builder: HistogramBuilder<'_, Histogram<f64>>) -> Histogram<f64> {
        self.histogram(&self.f64_resolver, builder)
    }

    fn u64_observable_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableCounter<u64>, u64>,
    ) -> ObservableCounter<u64> {
        self.observable(&self.u64_resolver, InstrumentKind::ObservableCounter, builder);
        ObservableCounter::new()
    }

    fn f64_observable_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableCounter<f64>, f64>,
    ) -> ObservableCounter<f64> {
        self.observable(&self.f64_resolver, InstrumentKind::ObservableCounter, builder);
        ObservableCounter::new()
    }

    fn i64_observable_up_down_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableUpDownCounter<i64>, i64>,
    ) -> ObservableUpDownCounter<i64> {
        self.observable(
            &self.i64_resolver,
            InstrumentKind::ObservableUpDownCounter,
            builder,
        );
        ObservableUpDownCounter::new()
    }

    fn f64_observable_up_down_counter(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableUpDownCounter<f64>, f64>,
    ) -> ObservableUpDownCounter<f64> {
        self.observable(
            &self.f64_resolver,
            InstrumentKind::ObservableUpDownCounter,
            builder,
        );
        ObservableUpDownCounter::new()
    }

    fn u64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<u64>, u64>,
    ) -> ObservableGauge<u64> {
        self.observable(&self.u64_resolver, InstrumentKind::ObservableGauge, builder);
        ObservableGauge::new()
    }

    fn i64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<i64>, i64>,
    ) -> ObservableGauge<i64> {
        self.observable(&self.i64_resolver, InstrumentKind::ObservableGauge, builder);
        ObservableGauge::new()
    }

    fn f64_observable_gauge(
        &self,
        builder: AsyncInstrumentBuilder<'_, ObservableGauge<f64>, f64>,
    ) -> ObservableGauge<f64> {
        self.observable(&self.f64_resolver, InstrumentKind::ObservableGauge, builder);
        ObservableGauge::new()
    }
}

fn validate_instrument_config(name: &str, unit: Option<&str>) -> MetricResult<()> {
    validate_instrument_name(name).and_then(|_| validate_instrument_unit(unit))
}

fn validate_instrument_name(name: &str) -> MetricResult<()> {
    if name.is_empty() {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_EMPTY,
        ));
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_LENGTH,
        ));
    }
    if name.starts_with(|c: char| !c.is_ascii_alphabetic()) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_FIRST_ALPHABETIC,
        ));
    }
    if name.contains(|c: char| {
        !c.is_ascii_alphanumeric() && !INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(MetricError::InvalidInstrumentConfiguration(
            INSTRUMENT_NAME_INVALID_CHAR,
        ));
    }
    Ok(())
}

fn validate_instrument_unit(unit: Option<&str>) -> MetricResult<()> {
    if let Some(unit) = unit {
        if unit.len() > INSTRUMENT_UNIT_NAME_MAX_LENGTH {
            return Err(MetricError::InvalidInstrumentConfiguration(
                INSTRUMENT_UNIT_LENGTH,
            ));
        }
        if unit.contains(|c: char| !c.is_ascii()) {
            return Err(MetricError::InvalidInstrumentConfiguration(
                INSTRUMENT_UNIT_INVALID_CHAR,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
    use crate::metrics::reader::MetricReader;
    use crate::metrics::{ManualReader, SdkMeterProvider};
    use otel_core::metrics::MeterProvider;
    use rstest::rstest;

    fn error_message(result: MetricResult<()>) -> Option<&'static str> {
        match result {
            Err(MetricError::InvalidInstrumentConfiguration(msg)) => Some(msg),
            _ => None,
        }
    }

    #[rstest]
    #[case("validateName", None)]
    #[case("_startWithNoneAlphabet", Some(INSTRUMENT_NAME_FIRST_ALPHABETIC))]
    #[case("utf8char锈", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("a".repeat(255).leak(), None)]
    #[case("a".repeat(256).leak(), Some(INSTRUMENT_NAME_LENGTH))]
    #[case("invalid name", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("allow/slash", None)]
    #[case("allow_under_score", None)]
    #[case("allow.dots.ok", None)]
    #[case("", Some(INSTRUMENT_NAME_EMPTY))]
    #[case("\\allow\\slash /sec", Some(INSTRUMENT_NAME_FIRST_ALPHABETIC))]
    #[case("\\allow\\$$slash /sec", Some(INSTRUMENT_NAME_FIRST_ALPHABETIC))]
    #[case("Total $ Count", Some(INSTRUMENT_NAME_INVALID_CHAR))]
    #[case("TotalCount", None)]
    fn instrument_name_validation(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(error_message(validate_instrument_name(name)), expected);
    }

    #[rstest]
    #[case(Some("validUnit"), None)]
    #[case(Some(&*"a".repeat(63).leak()), None)]
    #[case(Some(&*"a".repeat(64).leak()), Some(INSTRUMENT_UNIT_LENGTH))]
    #[case(Some("utf8char锈"), Some(INSTRUMENT_UNIT_INVALID_CHAR))]
    #[case(Some("kb"), None)]
    #[case(Some("Kb/sec"), None)]
    #[case(Some("%"), None)]
    #[case(None, None)]
    fn instrument_unit_validation(#[case] unit: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(error_message(validate_instrument_unit(unit)), expected);
    }

    fn setup() -> (ManualReader, SdkMeterProvider) {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        (reader, provider)
    }

    fn collect(reader: &ManualReader) -> ResourceMetrics {
        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        rm
    }

    #[test]
    fn invalid_instruments_record_nothing() {
        let (reader, provider) = setup();
        let meter = provider.meter("validation");

        meter.u64_counter("_bad").build().add(1, &[]);
        meter.f64_histogram("bad name").build().record(1.0, &[]);
        meter
            .u64_counter("bad_unit")
            .with_unit("µs")
            .build()
            .add(1, &[]);
        let _gauge = meter
            .i64_observable_gauge("9lives")
            .with_callback(|observer| observer.observe(1, &[]))
            .build();

        assert!(collect(&reader).scope_metrics.is_empty());
    }

    #[test]
    fn observable_callbacks_run_on_collect() {
        let (reader, provider) = setup();
        let meter = provider.meter("observable");
        let _counter = meter
            .u64_observable_counter("cpu.time")
            .with_callback(|observer| observer.observe(42, &[]))
            .build();

        let rm = collect(&reader);
        let metric = &rm.scope_metrics[0].metrics[0];
        assert_eq!(metric.name, "cpu.time");
        let AggregatedMetrics::U64(MetricData::Sum(sum)) = &metric.data else {
            panic!("unexpected data {:?}", metric.data);
        };
        assert!(sum.is_monotonic);
        assert_eq!(sum.data_points[0].value, 42);
    }

    #[test]
    fn invalid_boundaries_fall_back_to_defaults() {
        let (reader, provider) = setup();
        let histogram = provider
            .meter("histograms")
            .f64_histogram("latency")
            .with_boundaries(vec![5.0, 1.0])
            .build();
        histogram.record(3.0, &[]);

        let rm = collect(&reader);
        let AggregatedMetrics::F64(MetricData::Histogram(hist)) =
            &rm.scope_metrics[0].metrics[0].data
        else {
            panic!("expected a histogram");
        };
        assert_eq!(
            hist.data_points[0].bounds,
            crate::metrics::aggregation::DEFAULT_HISTOGRAM_BOUNDARIES.to_vec()
        );
    }

    #[test]
    fn advised_boundaries_are_used() {
        let (reader, provider) = setup();
        let histogram = provider
            .meter("histograms")
            .u64_histogram("size")
            .with_boundaries(vec![10.0, 100.0])
            .build();
        histogram.record(50, &[]);

        let rm = collect(&reader);
        let AggregatedMetrics::U64(MetricData::Histogram(hist)) =
            &rm.scope_metrics[0].metrics[0].data
        else {
            panic!("expected a histogram");
        };
        assert_eq!(hist.data_points[0].bounds, vec![10.0, 100.0]);
        assert_eq!(hist.data_points[0].bucket_counts, vec![0, 1, 0]);
    }
}
