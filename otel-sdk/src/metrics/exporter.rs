//! Interfaces for exporting metrics

use crate::error::OTelSdkResult;
use std::{fmt::Debug, future::Future, time::Duration};

use super::{data::ResourceMetrics, Temporality};

/// Exporter handles the delivery of metric data to external receivers.
///
/// This is the final component in the metric push pipeline. Both the
/// [`PeriodicReader`] and the [`BatchMetricProcessor`] drive `export` to
/// completion with `futures_executor::block_on` on their own thread.
///
/// [`PeriodicReader`]: crate::metrics::PeriodicReader
/// [`BatchMetricProcessor`]: crate::metrics::BatchMetricProcessor
pub trait PushMetricExporter: Send + Sync + Debug + 'static {
    /// Export serializes and transmits metric data to a receiver.
    ///
    /// Retries belong in the exporter, see [`RetryingExporter`]. Errors
    /// returned here are logged and the data is dropped.
    ///
    /// [`RetryingExporter`]: crate::retry::RetryingExporter
    fn export(&self, metrics: &ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send;

    /// Flushes any metric data held by an exporter.
    fn force_flush(&self) -> OTelSdkResult;

    /// Releases any held computational resources.
    ///
    /// After Shutdown is called, calls to Export will perform no operation and
    /// instead will return an error indicating the shutdown state.
    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult;

    /// Shutdown with the default timeout of 5 seconds.
    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown_with_timeout(Duration::from_secs(5))
    }

    /// Access the [Temporality] of the MetricExporter.
    fn temporality(&self) -> Temporality;
}

/// Object-safe view of a [PushMetricExporter], driving `export` to completion
/// on the calling thread.
pub(crate) trait BlockingExporter: Send + Sync + Debug {
    fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult;
    fn force_flush(&self) -> OTelSdkResult;
    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult;
    fn temporality(&self) -> Temporality;
}

impl<E: PushMetricExporter> BlockingExporter for E {
    fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        futures_executor::block_on(PushMetricExporter::export(self, metrics))
    }

    fn force_flush(&self) -> OTelSdkResult {
        PushMetricExporter::force_flush(self)
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        PushMetricExporter::shutdown_with_timeout(self, timeout)
    }

    fn temporality(&self) -> Temporality {
        PushMetricExporter::temporality(self)
    }
}
