use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::ResourceMetrics;
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::Temporality;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An in-memory metrics exporter that stores metrics data in memory.
///
/// Every exported [ResourceMetrics] snapshot is kept in export order until
/// [`reset`](InMemoryMetricExporter::reset) is called. Clones share the same
/// storage, so keep one clone for assertions and hand another to a reader.
///
/// # Example
///
/// ```
/// use otel_core::{metrics::MeterProvider, KeyValue};
/// use otel_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
///
/// let exporter = InMemoryMetricExporter::default();
/// let meter_provider = SdkMeterProvider::builder()
///     .with_reader(PeriodicReader::builder(exporter.clone()).build())
///     .build();
///
/// let counter = meter_provider.meter("example").u64_counter("my_counter").build();
/// counter.add(1, &[KeyValue::new("key", "value")]);
///
/// meter_provider.force_flush().unwrap();
///
/// let finished_metrics = exporter.get_finished_metrics().unwrap();
/// assert_eq!(finished_metrics.len(), 1);
/// # meter_provider.shutdown().unwrap();
/// ```
#[derive(Clone)]
pub struct InMemoryMetricExporter {
    metrics: Arc<Mutex<VecDeque<ResourceMetrics>>>,
    temporality: Temporality,
    is_shutdown: Arc<AtomicBool>,
}

impl fmt::Debug for InMemoryMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricExporter")
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl Default for InMemoryMetricExporter {
    fn default() -> Self {
        InMemoryMetricExporterBuilder::new().build()
    }
}

/// Builder for [`InMemoryMetricExporter`].
///
/// ```
/// use otel_sdk::metrics::{InMemoryMetricExporter, Temporality};
///
/// let exporter = InMemoryMetricExporter::builder()
///     .with_temporality(Temporality::Delta)
///     .build();
/// # drop(exporter);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricExporterBuilder {
    temporality: Option<Temporality>,
}

impl InMemoryMetricExporterBuilder {
    /// Creates a new instance of the `InMemoryMetricExporterBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the [Temporality] of the exporter, cumulative by default.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = Some(temporality);
        self
    }

    /// Creates a new instance of the `InMemoryMetricExporter`.
    pub fn build(self) -> InMemoryMetricExporter {
        InMemoryMetricExporter {
            metrics: Arc::new(Mutex::new(VecDeque::new())),
            temporality: self.temporality.unwrap_or_default(),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl InMemoryMetricExporter {
    /// Configuration for this exporter.
    pub fn builder() -> InMemoryMetricExporterBuilder {
        InMemoryMetricExporterBuilder::new()
    }

    /// Returns the exported snapshots, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn get_finished_metrics(&self) -> Result<Vec<ResourceMetrics>, OTelSdkError> {
        let metrics = self.metrics.lock()?;
        Ok(metrics.iter().cloned().collect())
    }

    /// Clears the internal storage of finished metrics.
    pub fn reset(&self) {
        let _ = self.metrics.lock().map(|mut metrics| metrics.clear());
    }
}

impl PushMetricExporter for InMemoryMetricExporter {
    async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.metrics
            .lock()
            .map(|mut stored| stored.push_back(metrics.clone()))
            .map_err(|_| OTelSdkError::InternalFailure("Failed to lock metrics".to_string()))
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        self.is_shutdown.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        self.temporality
    }
}
