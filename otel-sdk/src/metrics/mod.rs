//! The metrics half of the SDK: aggregation, views and readers.
//!
//! ## Configuration
//!
//! Each [SdkMeterProvider] owns its [Resource], its [View]s and one pipeline
//! per [ManualReader] or [PeriodicReader]. Every pipeline keeps its own
//! aggregators, so two readers with different temporalities see consistent
//! data.
//!
//! ### Example
//!
//! ```
//! use otel_core::global;
//! use otel_core::KeyValue;
//! use otel_sdk::{metrics::SdkMeterProvider, Resource};
//!
//! let resource = Resource::builder()
//!     .with_attribute(KeyValue::new("service.name", "checkout"))
//!     .build();
//!
//! let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
//! global::set_meter_provider(meter_provider.clone());
//!
//! let meter = global::meter("my_app");
//! let counter = meter
//!     .u64_counter("power_consumption")
//!     .with_unit("kWh")
//!     .build();
//!
//! counter.add(10, &[KeyValue::new("rate", "standard")]);
//!
//! // flush anything not yet exported
//! meter_provider.shutdown().unwrap();
//! ```
//!
//! [Resource]: crate::Resource

pub(crate) mod aggregation;
mod batch_metric_processor;
pub mod data;
mod error;
pub mod exporter;
pub(crate) mod instrument;
pub(crate) mod internal;
pub(crate) mod manual_reader;
pub(crate) mod meter;
mod meter_provider;
pub(crate) mod periodic_reader;
pub(crate) mod pipeline;
pub mod reader;
pub(crate) mod view;

/// In-Memory metric exporter for testing purpose.
#[cfg(any(feature = "testing", test))]
pub mod in_memory_exporter;
#[cfg(any(feature = "testing", test))]
pub use in_memory_exporter::{InMemoryMetricExporter, InMemoryMetricExporterBuilder};

pub use aggregation::Aggregation;
pub use batch_metric_processor::{BatchMetricProcessor, BatchMetricProcessorBuilder};
pub use error::{MetricError, MetricResult};
pub use exporter::PushMetricExporter;
pub use instrument::{Instrument, InstrumentKind, Stream};
pub use manual_reader::{ManualReader, ManualReaderBuilder};
pub use meter::SdkMeter;
pub use meter_provider::{MeterProviderBuilder, SdkMeterProvider};
pub use periodic_reader::{PeriodicReader, PeriodicReaderBuilder};
pub use pipeline::Pipeline;
pub use view::{new_view, View};

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// starting point.
    ///
    /// New measurements are added to all previous measurements since a start time.
    #[default]
    Cumulative,

    /// A measurement interval that resets each cycle.
    ///
    /// Measurements from one cycle are recorded independently, measurements from
    /// other cycles do not affect them.
    Delta,
}
