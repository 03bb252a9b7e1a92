use core::fmt;
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use arc_swap::ArcSwap;
use otel_core::{otel_debug, otel_warn, InstrumentationScope, KeyValue};

use crate::{
    error::{OTelSdkError, OTelSdkResult},
    metrics::{
        aggregation::{Aggregation, DEFAULT_HISTOGRAM_BOUNDARIES},
        data::{Metric, ResourceMetrics, ScopeMetrics},
        instrument::{Instrument, InstrumentId, InstrumentKind, Stream},
        internal::{self, AggregateBuilder, AggregateFns, Number},
        reader::{MetricReader, SdkProducer},
        view::View,
    },
    Resource,
};

/// Connects all of the instruments created by a meter provider to a [MetricReader].
///
/// This is the object that will be registered when a meter provider is
/// created.
///
/// As instruments are created the instrument should be checked if it exists in
/// the views of a the reader, and if so each aggregate function should be added
/// to the pipeline.
#[doc(hidden)]
pub struct Pipeline {
    pub(crate) resource: Resource,
    reader: Box<dyn MetricReader>,
    views: Vec<Arc<dyn View>>,
    inner: Mutex<PipelineInner>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pipeline")
    }
}

/// Runs the callbacks of one observable instrument.
type GenericCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct PipelineInner {
    aggregations: HashMap<InstrumentationScope, Vec<InstrumentSync>>,
    callbacks: Vec<GenericCallback>,
}

impl fmt::Debug for PipelineInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineInner")
            .field("aggregations", &self.aggregations)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Pipeline {
    /// Adds the [InstrumentSync] to pipeline with scope.
    ///
    /// Not idempotent, callers deduplicate through the [Inserter] cache.
    fn add_sync(&self, scope: InstrumentationScope, i_sync: InstrumentSync) {
        let _ = self.inner.lock().map(|mut inner| {
            otel_debug!(
                name: "MetricsPipeline.InstrumentCreated",
                instrument_name = i_sync.name.as_ref(),
            );
            inner.aggregations.entry(scope).or_default().push(i_sync);
        });
    }

    /// Registers a single instrument callback to be run when `produce` is called.
    fn add_callback(&self, callback: GenericCallback) {
        let _ = self
            .inner
            .lock()
            .map(|mut inner| inner.callbacks.push(callback));
    }

    /// Send accumulated telemetry
    fn force_flush(&self) -> OTelSdkResult {
        self.reader.force_flush()
    }

    /// Shut down pipeline
    fn shutdown(&self) -> OTelSdkResult {
        self.reader.shutdown()
    }
}

impl SdkProducer for Pipeline {
    /// Runs the observable callbacks, then collects every stream with a single
    /// end time. Streams without points and scopes without metrics are left
    /// out.
    fn produce(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        // callbacks may create instruments, which takes the lock again
        let callbacks = self.inner.lock()?.callbacks.clone();
        otel_debug!(
            name: "MetricsPipeline.InvokingObservableCallbacks",
            count = callbacks.len(),
        );
        for cb in &callbacks {
            cb();
        }

        let inner = self.inner.lock()?;
        let now = SystemTime::now();

        rm.resource = self.resource.clone();
        rm.scope_metrics.clear();
        for (scope, instruments) in inner.aggregations.iter() {
            let metrics: Vec<Metric> = instruments
                .iter()
                .filter_map(|inst| {
                    let data = inst.comp_agg.call(now)?;
                    Some(Metric {
                        name: inst.name.clone(),
                        description: inst.description.clone(),
                        unit: inst.unit.clone(),
                        data,
                    })
                })
                .collect();

            if !metrics.is_empty() {
                rm.scope_metrics.push(ScopeMetrics {
                    scope: scope.clone(),
                    metrics,
                });
            }
        }

        Ok(())
    }
}

/// A synchronization point between a [Pipeline] and an instrument's aggregate function.
struct InstrumentSync {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    comp_agg: Arc<dyn internal::ComputeAggregation>,
}

impl fmt::Debug for InstrumentSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSync")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .finish()
    }
}

type Measures<T> = Vec<Arc<dyn internal::Measure<T>>>;

/// Stream identities seen by a meter, keyed by lowercase name.
pub(crate) type StreamIds = Arc<Mutex<HashMap<Cow<'static, str>, InstrumentId>>>;

/// Facilitates inserting of new instruments from a single scope into a pipeline.
struct Inserter<T> {
    /// Streams resolved per instrument.
    ///
    /// Reads are lock-free. A miss takes the `aggregators` lock, resolves
    /// and publishes a new copy of the map.
    resolved: ArcSwap<HashMap<InstrumentId, Arc<Measures<T>>>>,

    /// Aggregate function inputs whose outputs have been inserted into the
    /// pipeline, keyed by stream identity. `None` marks a dropped stream.
    ///
    /// Two views producing the same stream share one aggregator.
    aggregators: Mutex<HashMap<InstrumentId, Option<Arc<dyn internal::Measure<T>>>>>,

    /// Shared by every inserter of a meter, used to warn about streams that
    /// share a name but not the rest of their identity.
    stream_ids: StreamIds,

    pipeline: Arc<Pipeline>,
}

impl<T> Inserter<T>
where
    T: Number,
{
    fn new(pipeline: Arc<Pipeline>, stream_ids: StreamIds) -> Self {
        Inserter {
            resolved: ArcSwap::from_pointee(HashMap::new()),
            aggregators: Default::default(),
            stream_ids,
            pipeline,
        }
    }

    /// Inserts the provided instrument into a pipeline.
    ///
    /// All views the pipeline contains are matched against, and every matching
    /// view with a compatible aggregation contributes one stream. Without a
    /// matching view the instrument gets the default stream for its kind.
    ///
    /// The returned measures are deduplicated. Asking again for the same
    /// instrument returns the same instances.
    fn instrument(&self, inst: Instrument, boundaries: Option<&[f64]>) -> Measures<T> {
        let Some(kind) = inst.kind else {
            otel_debug!(
                name: "MetricsPipeline.InstrumentWithoutKind",
                instrument_name = inst.name.as_ref(),
            );
            return Vec::new();
        };

        let mut key = self.inst_id(kind, &inst.name, &inst.description, &inst.unit);
        key.normalize();
        if let Some(measures) = self.resolved.load().get(&key) {
            return measures.to_vec();
        }

        let Ok(mut aggregators) = self.aggregators.lock() else {
            return Vec::new();
        };
        // another thread may have resolved it while we waited
        if let Some(measures) = self.resolved.load().get(&key) {
            return measures.to_vec();
        }

        let measures = self.resolve(&mut aggregators, inst, kind, boundaries);

        let mut next = HashMap::clone(&self.resolved.load());
        next.insert(key, Arc::new(measures.clone()));
        self.resolved.store(Arc::new(next));

        measures
    }

    fn resolve(
        &self,
        aggregators: &mut HashMap<InstrumentId, Option<Arc<dyn internal::Measure<T>>>>,
        inst: Instrument,
        kind: InstrumentKind,
        boundaries: Option<&[f64]>,
    ) -> Measures<T> {
        let mut matched = false;
        let mut measures = vec![];
        let mut seen = HashSet::new();

        for v in &self.pipeline.views {
            let Some(stream) = v.match_inst(&inst) else {
                continue;
            };
            matched = true;

            let id = self.inst_id(kind, &stream.name, &stream.description, &stream.unit);
            if !seen.insert(id) {
                continue;
            }

            if let Some(measure) = self.cached_aggregator(aggregators, &inst.scope, kind, stream) {
                measures.push(measure);
            }
        }

        if matched {
            return measures;
        }

        // Apply implicit default view if no explicit matched.
        let mut stream = Stream {
            name: inst.name,
            description: inst.description,
            unit: inst.unit,
            aggregation: None,
            allowed_attribute_keys: None,
        };

        // Boundaries advised by the instrument replace the defaults.
        if let Some(boundaries) = boundaries {
            stream.aggregation = Some(Aggregation::ExplicitBucketHistogram {
                boundaries: boundaries.to_vec(),
                record_min_max: true,
            });
        }

        measures.extend(self.cached_aggregator(aggregators, &inst.scope, kind, stream));
        measures
    }

    /// Returns the aggregate function input for a stream, creating and
    /// registering its output with the pipeline on first use.
    ///
    /// `None` is returned for dropped streams and for aggregations the
    /// instrument kind cannot use.
    fn cached_aggregator(
        &self,
        aggregators: &mut HashMap<InstrumentId, Option<Arc<dyn internal::Measure<T>>>>,
        scope: &InstrumentationScope,
        kind: InstrumentKind,
        mut stream: Stream,
    ) -> Option<Arc<dyn internal::Measure<T>>> {
        let agg = match stream.aggregation.take() {
            None | Some(Aggregation::Default) => default_aggregation_selector(kind),
            Some(agg) => agg,
        };

        if !is_aggregator_compatible(kind, &agg) {
            otel_warn!(
                name: "MetricsPipeline.ViewIncompatible",
                instrument_name = stream.name.as_ref(),
                instrument_kind = format!("{kind:?}"),
                aggregation = format!("{agg}"),
                message = "The aggregation is not compatible with the instrument kind, no stream is produced"
            );
            return None;
        }

        let mut id = self.inst_id(kind, &stream.name, &stream.description, &stream.unit);
        // Conflicting streams are still produced, with a warning.
        self.log_conflict(&id);

        // Requests for the same stream with different name casing get the
        // first one created.
        id.normalize();

        aggregators
            .entry(id)
            .or_insert_with(|| {
                let filter = stream.allowed_attribute_keys.clone().map(|allowed| {
                    Arc::new(move |kv: &KeyValue| allowed.contains(&kv.key))
                        as internal::Filter
                });

                let b = AggregateBuilder::new(self.pipeline.reader.temporality(kind), filter);
                let AggregateFns { measure, collect } = aggregate_fn(b, &agg, kind)?;

                self.pipeline.add_sync(
                    scope.clone(),
                    InstrumentSync {
                        name: stream.name,
                        description: stream.description,
                        unit: stream.unit,
                        comp_agg: collect,
                    },
                );

                Some(measure)
            })
            .clone()
    }

    /// Warns if a stream with the same name but a different identity exists.
    fn log_conflict(&self, id: &InstrumentId) {
        let Ok(mut ids) = self.stream_ids.lock() else {
            return;
        };

        let name: Cow<'static, str> = id.name.to_lowercase().into();
        match ids.get(&name) {
            Some(existing) if existing != id => {
                otel_warn!(
                    name: "MetricsPipeline.DuplicateStreamDefinition",
                    message = "duplicate metric stream definitions, both streams are produced",
                    reason = format!(
                        "names: ({} and {}), descriptions: ({} and {}), kinds: ({:?} and {:?}), units: ({:?} and {:?}), and numbers: ({} and {})",
                        existing.name, id.name,
                        existing.description, id.description,
                        existing.kind, id.kind,
                        existing.unit, id.unit,
                        existing.number, id.number,
                    )
                );
            }
            Some(_) => {}
            None => {
                ids.insert(name, id.clone());
            }
        }
    }

    fn inst_id(
        &self,
        kind: InstrumentKind,
        name: &Cow<'static, str>,
        description: &Cow<'static, str>,
        unit: &Cow<'static, str>,
    ) -> InstrumentId {
        InstrumentId {
            name: name.clone(),
            description: description.clone(),
            kind,
            unit: unit.clone(),
            number: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }
}

/// The default aggregation for an instrument of [InstrumentKind].
///
/// * Counter, UpDownCounter and their observable variants ⇨ Sum
/// * Gauge and Observable Gauge ⇨ LastValue
/// * Histogram ⇨ ExplicitBucketHistogram
fn default_aggregation_selector(kind: InstrumentKind) -> Aggregation {
    match kind {
        InstrumentKind::Counter
        | InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableCounter
        | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
        InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
        InstrumentKind::Histogram => Aggregation::ExplicitBucketHistogram {
            boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            record_min_max: true,
        },
    }
}

/// Returns new aggregate functions for the given params, `None` for [Aggregation::Drop].
fn aggregate_fn<T: Number>(
    b: AggregateBuilder<T>,
    agg: &Aggregation,
    kind: InstrumentKind,
) -> Option<AggregateFns<T>> {
    // Sums of up-down counters and of gauges are meaningless.
    let record_sum = !matches!(
        kind,
        InstrumentKind::UpDownCounter
            | InstrumentKind::ObservableUpDownCounter
            | InstrumentKind::Gauge
            | InstrumentKind::ObservableGauge
    );

    match agg {
        Aggregation::Default => aggregate_fn(b, &default_aggregation_selector(kind), kind),
        Aggregation::Drop => None,
        Aggregation::LastValue => Some(b.last_value()),
        Aggregation::Sum => Some(match kind {
            InstrumentKind::ObservableCounter => b.precomputed_sum(true),
            InstrumentKind::ObservableUpDownCounter => b.precomputed_sum(false),
            InstrumentKind::Counter | InstrumentKind::Histogram => b.sum(true),
            _ => b.sum(false),
        }),
        Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max,
        } => Some(b.explicit_bucket_histogram(boundaries.to_vec(), *record_min_max, record_sum)),
        Aggregation::Base2ExponentialHistogram {
            max_size,
            max_scale,
            record_min_max,
        } => Some(b.exponential_bucket_histogram(
            *max_size,
            *max_scale,
            *record_min_max,
            record_sum,
        )),
    }
}

/// Checks if the aggregation can be used by the instrument.
///
/// | Instrument Kind          | Drop | LastValue | Sum | Histogram | Exponential Histogram |
/// |--------------------------|------|-----------|-----|-----------|-----------------------|
/// | Counter                  | ✓    | ✓         | ✓   | ✓         | ✓                     |
/// | UpDownCounter            | ✓    | ✓         | ✓   | ✓         | ✓                     |
/// | Histogram                | ✓    | ✓         | ✓   | ✓         | ✓                     |
/// | Observable Counter       | ✓    | ✓         | ✓   |           | ✓                     |
/// | Observable UpDownCounter | ✓    | ✓         | ✓   |           | ✓                     |
/// | Gauge                    | ✓    | ✓         |     | ✓         | ✓                     |
/// | Observable Gauge         | ✓    | ✓         |     |           | ✓                     |
///
/// Observable instruments report absolute values, which an explicit bucket
/// histogram would count again on every collection.
fn is_aggregator_compatible(kind: InstrumentKind, agg: &Aggregation) -> bool {
    match agg {
        Aggregation::ExplicitBucketHistogram { .. } => !kind.is_async(),
        Aggregation::Sum => !matches!(kind, InstrumentKind::Gauge | InstrumentKind::ObservableGauge),
        Aggregation::Default
        | Aggregation::Drop
        | Aggregation::LastValue
        | Aggregation::Base2ExponentialHistogram { .. } => true,
    }
}

/// The group of pipelines connecting Readers with instrument measurement.
#[derive(Clone, Debug)]
pub(crate) struct Pipelines(pub(crate) Vec<Arc<Pipeline>>);

impl Pipelines {
    pub(crate) fn new(
        res: Resource,
        readers: Vec<Box<dyn MetricReader>>,
        views: Vec<Arc<dyn View>>,
    ) -> Self {
        let mut pipes = Vec::with_capacity(readers.len());
        for r in readers {
            let p = Arc::new(Pipeline {
                resource: res.clone(),
                reader: r,
                views: views.clone(),
                inner: Default::default(),
            });
            p.reader.register_pipeline(Arc::downgrade(&p));
            pipes.push(p);
        }

        Pipelines(pipes)
    }

    pub(crate) fn register_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cb: GenericCallback = Arc::new(callback);
        for pipe in &self.0 {
            pipe.add_callback(cb.clone())
        }
    }

    /// Force flush all pipelines
    pub(crate) fn force_flush(&self) -> OTelSdkResult {
        collect_errors(self.0.iter().map(|pipeline| pipeline.force_flush()))
    }

    /// Shut down all pipelines
    pub(crate) fn shutdown(&self) -> OTelSdkResult {
        collect_errors(self.0.iter().map(|pipeline| pipeline.shutdown()))
    }
}

fn collect_errors(results: impl Iterator<Item = OTelSdkResult>) -> OTelSdkResult {
    let mut errs: Vec<OTelSdkError> = results.filter_map(Result::err).collect();
    if errs.len() > 1 {
        return Err(OTelSdkError::InternalFailure(format!("{errs:?}")));
    }
    errs.pop().map_or(Ok(()), Err)
}

/// Resolves the aggregate functions an instrument calls to aggregate
/// measurements, updating every pipeline that pulls from them.
pub(crate) struct Resolver<T> {
    inserters: Vec<Inserter<T>>,
}

impl<T> Resolver<T>
where
    T: Number,
{
    pub(crate) fn new(pipelines: Arc<Pipelines>, stream_ids: StreamIds) -> Self {
        let inserters = pipelines
            .0
            .iter()
            .map(|pipe| Inserter::new(Arc::clone(pipe), Arc::clone(&stream_ids)))
            .collect();

        Resolver { inserters }
    }

    /// The measures that must be updated by the instrument defined by key.
    pub(crate) fn measures(&self, inst: Instrument, boundaries: Option<Vec<f64>>) -> Measures<T> {
        let mut measures = vec![];
        for inserter in &self.inserters {
            measures.extend(inserter.instrument(inst.clone(), boundaries.as_deref()));
        }

        if measures.is_empty() {
            otel_debug!(
                name: "MetricsPipeline.InstrumentDropped",
                instrument_name = inst.name.as_ref(),
                message = "No stream is configured for the instrument, its measurements are dropped"
            );
        }

        measures
    }
}
