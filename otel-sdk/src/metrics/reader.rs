//! Interfaces for reading and producing metrics
use std::{fmt, sync::Weak};

use crate::error::OTelSdkResult;

use super::{data::ResourceMetrics, pipeline::Pipeline, InstrumentKind, Temporality};

/// Connects a metrics pipeline to whatever consumes its output.
///
/// The provider drives `force_flush` and `shutdown`, while the reader decides
/// when to `collect`. A reader is inert until the provider hands it a
/// [`Pipeline`] through `register_pipeline`.
///
/// Push exporters are usually wrapped in a [`PeriodicReader`]. Pull-based
/// consumers implement `MetricReader` themselves or wrap a [`ManualReader`].
///
/// [`PeriodicReader`]: crate::metrics::PeriodicReader
/// [`ManualReader`]: crate::metrics::ManualReader
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Attaches the pipeline this reader collects from.
    ///
    /// Only a weak handle is kept so that dropping the provider releases the
    /// pipeline.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>);

    /// Runs one collection cycle and writes the result into `rm`.
    ///
    /// Fails with [`OTelSdkError::AlreadyShutdown`] once the reader is shut
    /// down, and with an internal failure when no pipeline is registered.
    ///
    /// [`OTelSdkError::AlreadyShutdown`]: crate::error::OTelSdkError::AlreadyShutdown
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult;

    /// Pushes any pending data to the exporter, if there is one.
    fn force_flush(&self) -> OTelSdkResult;

    /// Stops the reader. Later calls to `collect` fail.
    fn shutdown(&self) -> OTelSdkResult;

    /// Temporality to use for instruments of `kind`.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;
}

/// Produces metrics for a [MetricReader].
pub(crate) trait SdkProducer: fmt::Debug + Send + Sync {
    /// Returns aggregated metrics from a single collection.
    fn produce(&self, rm: &mut ResourceMetrics) -> OTelSdkResult;
}
