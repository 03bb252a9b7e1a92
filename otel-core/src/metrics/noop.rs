//! No-op metrics implementations.
//!
//! Used as the global default before an SDK provider is installed, and by the
//! SDK for instruments whose configuration was rejected.
use crate::metrics::{InstrumentProvider, Meter, MeterProvider, SyncInstrument};
use crate::{InstrumentationScope, KeyValue};
use std::marker::PhantomData;
use std::sync::Arc;

/// A [`MeterProvider`] whose meters create instruments that record nothing.
#[derive(Debug, Default)]
pub struct NoopMeterProvider {
    _private: (),
}

impl NoopMeterProvider {
    /// Create a new no-op meter provider.
    pub fn new() -> Self {
        NoopMeterProvider { _private: () }
    }
}

impl MeterProvider for NoopMeterProvider {
    fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
        Meter::new(Arc::new(NoopMeter::new()))
    }
}

/// Creates no-op instruments through the defaults of [`InstrumentProvider`].
#[derive(Debug, Default)]
pub struct NoopMeter {
    _private: (),
}

impl NoopMeter {
    /// Create a new no-op meter core.
    pub fn new() -> Self {
        NoopMeter { _private: () }
    }
}

impl InstrumentProvider for NoopMeter {}

/// A synchronous instrument that discards every measurement.
#[derive(Debug, Default)]
pub struct NoopSyncInstrument<T> {
    _marker: PhantomData<T>,
}

impl<T> NoopSyncInstrument<T> {
    /// Create a new no-op instrument.
    pub fn new() -> Self {
        NoopSyncInstrument {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync> SyncInstrument<T> for NoopSyncInstrument<T> {
    fn measure(&self, _value: T, _attributes: &[KeyValue]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_instruments_accept_measurements() {
        let meter = NoopMeterProvider::new().meter("noop");
        let counter = meter.u64_counter("requests").with_unit("1").build();
        counter.add(1, &[KeyValue::new("k", "v")]);
        let histogram = meter.f64_histogram("latency").with_boundaries(vec![1.0]).build();
        histogram.record(0.5, &[]);
        let _gauge = meter
            .i64_observable_gauge("temperature")
            .with_callback(|observer| observer.observe(1, &[]))
            .build();
    }
}
