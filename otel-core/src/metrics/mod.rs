//! # Metrics API
//!
//! Instruments are created from a [`Meter`], which is obtained from a
//! [`MeterProvider`]. Synchronous instruments ([`Counter`], [`UpDownCounter`],
//! [`Histogram`], [`Gauge`]) record measurements inline; observable
//! instruments report through callbacks that the SDK invokes at collection
//! time.
//!
//! ```
//! use otel_core::{global, KeyValue};
//!
//! let meter = global::meter("my-library");
//! let requests = meter
//!     .u64_counter("http.server.requests")
//!     .with_description("Completed requests")
//!     .build();
//! requests.add(1, &[KeyValue::new("http.response.status_code", 200_i64)]);
//! ```

mod instruments;
mod meter;
pub mod noop;

pub use instruments::{
    AsyncInstrument, AsyncInstrumentBuilder, Callback, Counter, Gauge, Histogram,
    HistogramBuilder, InstrumentBuilder, ObservableCounter, ObservableGauge,
    ObservableUpDownCounter, SyncInstrument, UpDownCounter,
};
pub use meter::{InstrumentProvider, Meter, MeterProvider};
