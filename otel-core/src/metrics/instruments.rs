use crate::KeyValue;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::InstrumentProvider;

/// An SDK implemented instrument that records measurements synchronously.
pub trait SyncInstrument<T>: Send + Sync {
    /// Records a measurement.
    fn measure(&self, measurement: T, attributes: &[KeyValue]);
}

/// An SDK implemented instrument that records measurements via callback.
pub trait AsyncInstrument<T>: Send + Sync {
    /// Observes the state of the instrument.
    ///
    /// It is only valid to call this within a callback.
    fn observe(&self, measurement: T, attributes: &[KeyValue]);
}

/// A function the SDK calls at collection time to gather observations.
///
/// The function needs to complete in a finite amount of time.
pub type Callback<T> = Box<dyn Fn(&dyn AsyncInstrument<T>) + Send + Sync>;

macro_rules! sync_instrument {
    ($(#[$doc:meta])* $ty:ident, $method:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        #[non_exhaustive]
        pub struct $ty<T>(Arc<dyn SyncInstrument<T> + Send + Sync>);

        impl<T> fmt::Debug for $ty<T>
        where
            T: fmt::Debug,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!("{}<{}>", stringify!($ty), std::any::type_name::<T>()))
            }
        }

        impl<T> $ty<T> {
            /// Wraps an SDK instrument.
            pub fn new(inner: Arc<dyn SyncInstrument<T> + Send + Sync>) -> Self {
                $ty(inner)
            }

            /// Records a measurement with the given attributes.
            pub fn $method(&self, value: T, attributes: &[KeyValue]) {
                self.0.measure(value, attributes)
            }
        }
    };
}

sync_instrument!(
    /// A monotonically increasing sum.
    Counter,
    add
);
sync_instrument!(
    /// A sum that can go up and down.
    UpDownCounter,
    add
);
sync_instrument!(
    /// Records a distribution of values.
    Histogram,
    record
);
sync_instrument!(
    /// Records the current value, replacing the previous one.
    Gauge,
    record
);

macro_rules! observable_instrument {
    ($(#[$doc:meta])* $ty:ident) => {
        $(#[$doc])*
        ///
        /// The handle carries no state: observations are made by the callbacks
        /// registered when building it. Dropping it does not unregister them.
        #[derive(Clone)]
        #[non_exhaustive]
        pub struct $ty<T> {
            _marker: PhantomData<T>,
        }

        impl<T> $ty<T> {
            /// Creates a new handle.
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                $ty {
                    _marker: PhantomData,
                }
            }
        }

        impl<T> fmt::Debug for $ty<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!("{}<{}>", stringify!($ty), std::any::type_name::<T>()))
            }
        }
    };
}

observable_instrument!(
    /// An observable monotonically increasing sum.
    ObservableCounter
);
observable_instrument!(
    /// An observable sum that can go up and down.
    ObservableUpDownCounter
);
observable_instrument!(
    /// An observable current value.
    ObservableGauge
);

/// Configuration for building a synchronous instrument.
#[non_exhaustive]
pub struct InstrumentBuilder<'a, T> {
    /// Provider that builds the instrument.
    pub instrument_provider: &'a dyn InstrumentProvider,
    /// Name of the instrument.
    pub name: Cow<'static, str>,
    /// Description of the instrument.
    pub description: Option<Cow<'static, str>>,
    /// Unit of the instrument.
    pub unit: Option<Cow<'static, str>>,
    _marker: PhantomData<T>,
}

impl<'a, T> InstrumentBuilder<'a, T> {
    pub(crate) fn new(meter: &'a super::Meter, name: Cow<'static, str>) -> Self {
        InstrumentBuilder {
            instrument_provider: meter.instrument_provider.as_ref(),
            name,
            description: None,
            unit: None,
            _marker: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    ///
    /// Unit is case sensitive (`kb` is not the same as `kB`).
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

impl<T> fmt::Debug for InstrumentBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("kind", &std::any::type_name::<T>())
            .finish()
    }
}

macro_rules! build_sync_instrument {
    ($method:ident, $inst:ty) => {
        impl InstrumentBuilder<'_, $inst> {
            /// Validates the configuration and creates the instrument.
            ///
            /// An invalid configuration is logged by the SDK and yields an
            /// instrument that discards measurements.
            pub fn build(self) -> $inst {
                self.instrument_provider.$method(self)
            }
        }
    };
}

build_sync_instrument!(u64_counter, Counter<u64>);
build_sync_instrument!(f64_counter, Counter<f64>);
build_sync_instrument!(i64_up_down_counter, UpDownCounter<i64>);
build_sync_instrument!(f64_up_down_counter, UpDownCounter<f64>);
build_sync_instrument!(u64_gauge, Gauge<u64>);
build_sync_instrument!(i64_gauge, Gauge<i64>);
build_sync_instrument!(f64_gauge, Gauge<f64>);

/// Configuration for building a [`Histogram`].
#[non_exhaustive]
pub struct HistogramBuilder<'a, T> {
    /// Provider that builds the instrument.
    pub instrument_provider: &'a dyn InstrumentProvider,
    /// Name of the histogram.
    pub name: Cow<'static, str>,
    /// Description of the histogram.
    pub description: Option<Cow<'static, str>>,
    /// Unit of the histogram.
    pub unit: Option<Cow<'static, str>>,
    /// Bucket boundaries advised for this histogram. A view configuring an
    /// aggregation takes precedence.
    pub boundaries: Option<Vec<f64>>,
    _marker: PhantomData<T>,
}

impl<'a, T> HistogramBuilder<'a, T> {
    pub(crate) fn new(meter: &'a super::Meter, name: Cow<'static, str>) -> Self {
        HistogramBuilder {
            instrument_provider: meter.instrument_provider.as_ref(),
            name,
            description: None,
            unit: None,
            boundaries: None,
            _marker: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the explicit bucket boundaries. They must be strictly increasing
    /// and free of NaN, otherwise the default boundaries are used.
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }
}

impl<T> fmt::Debug for HistogramBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("boundaries", &self.boundaries)
            .field("kind", &std::any::type_name::<T>())
            .finish()
    }
}

impl HistogramBuilder<'_, Histogram<u64>> {
    /// Validates the configuration and creates the histogram.
    pub fn build(self) -> Histogram<u64> {
        self.instrument_provider.u64_histogram(self)
    }
}

impl HistogramBuilder<'_, Histogram<f64>> {
    /// Validates the configuration and creates the histogram.
    pub fn build(self) -> Histogram<f64> {
        self.instrument_provider.f64_histogram(self)
    }
}

/// Configuration for building an observable instrument.
#[non_exhaustive]
pub struct AsyncInstrumentBuilder<'a, I, M> {
    /// Provider that builds the instrument.
    pub instrument_provider: &'a dyn InstrumentProvider,
    /// Name of the instrument.
    pub name: Cow<'static, str>,
    /// Description of the instrument.
    pub description: Option<Cow<'static, str>>,
    /// Unit of the instrument.
    pub unit: Option<Cow<'static, str>>,
    /// Callbacks invoked on every collection.
    pub callbacks: Vec<Callback<M>>,
    _inst: PhantomData<I>,
}

impl<'a, I, M> AsyncInstrumentBuilder<'a, I, M> {
    pub(crate) fn new(meter: &'a super::Meter, name: Cow<'static, str>) -> Self {
        AsyncInstrumentBuilder {
            instrument_provider: meter.instrument_provider.as_ref(),
            name,
            description: None,
            unit: None,
            callbacks: Vec::new(),
            _inst: PhantomData,
        }
    }

    /// Set the description for this instrument
    pub fn with_description<S: Into<Cow<'static, str>>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit for this instrument.
    pub fn with_unit<S: Into<Cow<'static, str>>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Adds a callback to be called for this instrument on each collection.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn AsyncInstrument<M>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

impl<I, M> fmt::Debug for AsyncInstrumentBuilder<'_, I, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncInstrumentBuilder")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("kind", &std::any::type_name::<I>())
            .field("callbacks_len", &self.callbacks.len())
            .finish()
    }
}

macro_rules! build_async_instrument {
    ($method:ident, $inst:ty, $m:ty) => {
        impl AsyncInstrumentBuilder<'_, $inst, $m> {
            /// Validates the configuration and registers the instrument's
            /// callbacks.
            pub fn build(self) -> $inst {
                self.instrument_provider.$method(self)
            }
        }
    };
}

build_async_instrument!(u64_observable_counter, ObservableCounter<u64>, u64);
build_async_instrument!(f64_observable_counter, ObservableCounter<f64>, f64);
build_async_instrument!(i64_observable_up_down_counter, ObservableUpDownCounter<i64>, i64);
build_async_instrument!(f64_observable_up_down_counter, ObservableUpDownCounter<f64>, f64);
build_async_instrument!(u64_observable_gauge, ObservableGauge<u64>, u64);
build_async_instrument!(i64_observable_gauge, ObservableGauge<i64>, i64);
build_async_instrument!(f64_observable_gauge, ObservableGauge<f64>, f64);
