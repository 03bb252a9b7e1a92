use std::{borrow::Cow, collections::HashSet, sync::Arc};

use otel_core::{
    metrics::{AsyncInstrument, SyncInstrument},
    InstrumentationScope, Key, KeyValue,
};

use crate::metrics::{aggregation::Aggregation, internal::Measure};

use super::Temporality;

/// The identifier of a group of instruments that all perform the same function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Identifies a group of instruments that record increasing values synchronously
    /// with the code path they are measuring.
    Counter,
    /// A group of instruments that record increasing and decreasing values
    /// synchronously with the code path they are measuring.
    UpDownCounter,
    /// A group of instruments that record a distribution of values synchronously with
    /// the code path they are measuring.
    Histogram,
    /// A group of instruments that record increasing values in an asynchronous
    /// callback.
    ObservableCounter,
    /// A group of instruments that record increasing and decreasing values in an
    /// asynchronous callback.
    ObservableUpDownCounter,
    /// a group of instruments that record current value synchronously with
    /// the code path they are measuring.
    Gauge,
    /// a group of instruments that record current values in an asynchronous callback.
    ObservableGauge,
}

impl InstrumentKind {
    /// Select the [Temporality] for this kind given an exporter's preference.
    ///
    /// Up-down counters stay cumulative under a delta preference, since a
    /// delta of a non-monotonic sum is rarely useful to a backend.
    pub(crate) fn temporality_preference(&self, temporality: Temporality) -> Temporality {
        match temporality {
            Temporality::Cumulative => Temporality::Cumulative,
            Temporality::Delta => match self {
                Self::Counter
                | Self::Histogram
                | Self::ObservableCounter
                | Self::Gauge
                | Self::ObservableGauge => Temporality::Delta,
                Self::UpDownCounter | Self::ObservableUpDownCounter => Temporality::Cumulative,
            },
        }
    }

    /// Whether instruments of this kind report through callbacks.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::ObservableCounter | Self::ObservableUpDownCounter | Self::ObservableGauge
        )
    }
}

/// Describes the properties of an instrument at creation, used for filtering in
/// views.
///
/// The same type is used as selection criteria in [`new_view`]: empty fields
/// and a `None` kind match anything.
///
/// # Example
///
/// ```rust
/// use otel_sdk::metrics::{Instrument, InstrumentKind};
///
/// let criteria = Instrument::new()
///     .name("http.server.*")
///     .kind(InstrumentKind::Histogram);
/// # drop(criteria)
/// ```
///
/// [`new_view`]: crate::metrics::new_view
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Instrument {
    /// The human-readable identifier of the instrument.
    pub(crate) name: Cow<'static, str>,
    /// describes the purpose of the instrument.
    pub(crate) description: Cow<'static, str>,
    /// The functional group of the instrument.
    pub(crate) kind: Option<InstrumentKind>,
    /// Unit is the unit of measurement recorded by the instrument.
    pub(crate) unit: Cow<'static, str>,
    /// The instrumentation that created the instrument.
    pub(crate) scope: InstrumentationScope,
}

impl Instrument {
    /// Create a new instrument with default values
    pub fn new() -> Self {
        Instrument::default()
    }

    /// Set the instrument name.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the instrument description.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the instrument unit.
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the instrument kind.
    pub fn kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the instrument scope.
    pub fn scope(mut self, scope: InstrumentationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Instrument name.
    pub fn instrument_name(&self) -> &str {
        self.name.as_ref()
    }

    /// Instrument kind, `None` for criteria that match any kind.
    pub fn instrument_kind(&self) -> Option<InstrumentKind> {
        self.kind
    }

    /// Instrument unit.
    pub fn instrument_unit(&self) -> &str {
        self.unit.as_ref()
    }

    /// Instrument scope.
    pub fn instrument_scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Returns `true` when no selection criteria are set.
    pub(crate) fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.kind.is_none()
            && self.unit.is_empty()
            && self.scope == InstrumentationScope::default()
    }

    pub(crate) fn matches_kind(&self, other: &Instrument) -> bool {
        self.kind.is_none() || self.kind == other.kind
    }

    pub(crate) fn matches_unit(&self, other: &Instrument) -> bool {
        self.unit.is_empty() || self.unit == other.unit
    }

    pub(crate) fn matches_description(&self, other: &Instrument) -> bool {
        self.description.is_empty() || self.description == other.description
    }

    pub(crate) fn matches_scope(&self, other: &Instrument) -> bool {
        (self.scope.name().is_empty() || self.scope.name() == other.scope.name())
            && (self.scope.version().is_none()
                || self.scope.version() == other.scope.version())
            && (self.scope.schema_url().is_none()
                || self.scope.schema_url() == other.scope.schema_url())
    }
}

/// Describes the stream of data an instrument produces.
///
/// Used as the mask of [`new_view`] or returned by custom views to override
/// the output of matching instruments. Empty fields keep the instrument's own
/// values.
///
/// # Example
///
/// ```
/// use otel_sdk::metrics::{Aggregation, Stream};
///
/// let stream = Stream::new()
///     .name("latency")
///     .aggregation(Aggregation::Base2ExponentialHistogram {
///         max_size: 160,
///         max_scale: 20,
///         record_min_max: true,
///     });
/// # drop(stream)
/// ```
///
/// [`new_view`]: crate::metrics::new_view
#[derive(Default, Debug, Clone)]
#[non_exhaustive]
pub struct Stream {
    /// The human-readable identifier of the stream.
    pub(crate) name: Cow<'static, str>,
    /// Describes the purpose of the data.
    pub(crate) description: Cow<'static, str>,
    /// the unit of measurement recorded.
    pub(crate) unit: Cow<'static, str>,
    /// Aggregation the stream uses for an instrument.
    pub(crate) aggregation: Option<Aggregation>,
    /// An allow-list of attribute keys that will be preserved for the stream.
    ///
    /// Any attribute recorded for the stream with a key not in this set will be
    /// dropped. If the set is empty, all attributes will be dropped, if `None` all
    /// attributes will be kept.
    pub(crate) allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
}

impl Stream {
    /// Create a new stream with empty values.
    pub fn new() -> Self {
        Stream::default()
    }

    /// Set the stream name.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the stream description.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the stream unit.
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the stream aggregation.
    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Set the stream allowed attribute keys.
    ///
    /// Any attribute recorded for the stream with a key not in this set will be
    /// dropped. If this method is not used, all attributes will be kept.
    pub fn allowed_attribute_keys(mut self, attribute_keys: impl IntoIterator<Item = Key>) -> Self {
        self.allowed_attribute_keys = Some(Arc::new(attribute_keys.into_iter().collect()));
        self
    }
}

/// The identifying properties of a stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub(crate) struct InstrumentId {
    /// The human-readable identifier of the instrument.
    pub(crate) name: Cow<'static, str>,
    /// Describes the purpose of the data.
    pub(crate) description: Cow<'static, str>,
    /// Defines the functional group of the instrument.
    pub(crate) kind: InstrumentKind,
    /// The unit of measurement recorded.
    pub(crate) unit: Cow<'static, str>,
    /// Number is the underlying data type of the instrument.
    pub(crate) number: Cow<'static, str>,
}

impl InstrumentId {
    /// Instrument names are considered case-insensitive ASCII.
    ///
    /// Standardize the instrument name to always be lowercase so it can be compared
    /// via hash.
    pub(crate) fn normalize(&mut self) {
        if self.name.chars().any(|c| c.is_ascii_uppercase()) {
            self.name = self.name.to_ascii_lowercase().into();
        }
    }
}

pub(crate) struct ResolvedMeasures<T> {
    pub(crate) measures: Vec<Arc<dyn Measure<T>>>,
}

impl<T: Copy + 'static> SyncInstrument<T> for ResolvedMeasures<T> {
    fn measure(&self, val: T, attrs: &[KeyValue]) {
        for measure in &self.measures {
            measure.call(val, attrs)
        }
    }
}

/// The observer handed to callbacks of asynchronous instruments.
#[derive(Clone)]
pub(crate) struct Observable<T> {
    measures: Vec<Arc<dyn Measure<T>>>,
}

impl<T> Observable<T> {
    pub(crate) fn new(measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        Self { measures }
    }
}

impl<T: Copy + Send + Sync + 'static> AsyncInstrument<T> for Observable<T> {
    fn observe(&self, measurement: T, attrs: &[KeyValue]) {
        for measure in &self.measures {
            measure.call(measurement, attrs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_preference_keeps_up_down_counters_cumulative() {
        assert_eq!(
            InstrumentKind::Counter.temporality_preference(Temporality::Delta),
            Temporality::Delta
        );
        assert_eq!(
            InstrumentKind::ObservableUpDownCounter.temporality_preference(Temporality::Delta),
            Temporality::Cumulative
        );
        assert_eq!(
            InstrumentKind::Histogram.temporality_preference(Temporality::Cumulative),
            Temporality::Cumulative
        );
    }

    #[test]
    fn criteria_filters() {
        let inst = Instrument::new()
            .name("requests")
            .kind(InstrumentKind::Counter)
            .unit("1")
            .scope(InstrumentationScope::builder("http").with_version("1.0").build());

        assert!(Instrument::new().is_empty());
        assert!(Instrument::new().matches_kind(&inst));
        assert!(!Instrument::new().kind(InstrumentKind::Gauge).matches_kind(&inst));
        assert!(Instrument::new().unit("1").matches_unit(&inst));
        assert!(!Instrument::new().unit("ms").matches_unit(&inst));

        let by_meter = Instrument::new().scope(InstrumentationScope::builder("http").build());
        assert!(by_meter.matches_scope(&inst));
        let by_version = Instrument::new()
            .scope(InstrumentationScope::builder("http").with_version("2.0").build());
        assert!(!by_version.matches_scope(&inst));
    }

    #[test]
    fn instrument_id_normalizes_case() {
        let mut id = InstrumentId {
            name: "Requests".into(),
            description: "".into(),
            kind: InstrumentKind::Counter,
            unit: "".into(),
            number: "u64".into(),
        };
        id.normalize();
        assert_eq!(id.name, "requests");
    }
}
