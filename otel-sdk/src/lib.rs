//! The SDK half of the telemetry pipeline.
//!
//! Three subsystems live here:
//!
//! * **Metrics** ([`metrics`]): instruments created from an
//!   [`SdkMeterProvider`](metrics::SdkMeterProvider) feed per-attribute-set
//!   aggregators selected by [`View`](metrics::View)s. Readers collect
//!   snapshots with the temporality they ask for.
//! * **Export** ([`export`], [`retry`], [`logs`]): a bounded, lossy queue
//!   drained by a background worker in batches, and a retrying wrapper around
//!   network calls with exponential backoff, server-advised delays and a
//!   global deadline.
//! * **Sampling** ([`trace`]): the classic samplers and the consistent
//!   probability samplers that record their threshold in the `ot` member of
//!   the trace state.
//!
//! ```
//! # #[cfg(feature = "metrics")]
//! # {
//! use otel_core::{metrics::MeterProvider, KeyValue};
//! use otel_sdk::metrics::{data::ResourceMetrics, ManualReader, SdkMeterProvider};
//! use otel_sdk::metrics::reader::MetricReader;
//!
//! let reader = ManualReader::builder().build();
//! let provider = SdkMeterProvider::builder().with_reader(reader.clone()).build();
//!
//! let counter = provider.meter("example").u64_counter("requests").build();
//! counter.add(1, &[KeyValue::new("route", "/")]);
//!
//! let mut metrics = ResourceMetrics::default();
//! reader.collect(&mut metrics).unwrap();
//! assert_eq!(metrics.scope_metrics().count(), 1);
//! # }
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

pub mod error;
pub mod export;
#[cfg(feature = "logs")]
pub mod logs;
#[cfg(feature = "metrics")]
pub mod metrics;
mod resource;
pub mod retry;
#[cfg(feature = "trace")]
pub mod trace;

pub use resource::{Resource, ResourceBuilder};
