//! Queues collected [ResourceMetrics] snapshots and pushes them to a
//! [PushMetricExporter] from the `OpenTelemetry.Metrics.BatchProcessor`
//! thread.
//!
//! Unlike the [`PeriodicReader`](super::PeriodicReader), the processor never
//! collects on its own. The caller hands it snapshots, typically produced by a
//! [`ManualReader`](super::ManualReader), and the processor decouples the
//! export from the collecting thread. A full queue drops the oldest snapshot.
use std::{fmt, sync::Arc, time::Duration};

use crate::{
    error::{OTelSdkError, OTelSdkResult},
    export::{BatchConfig, BatchConfigBuilder, BatchExporter, BatchProcessor},
};

use super::{data::ResourceMetrics, exporter::BlockingExporter, PushMetricExporter};

struct MetricExportAdapter {
    exporter: Box<dyn BlockingExporter>,
}

impl BatchExporter<ResourceMetrics> for MetricExportAdapter {
    fn export(&self, batch: Vec<ResourceMetrics>) -> OTelSdkResult {
        // keep going so one failed snapshot does not drop the rest of the batch
        let mut result = Ok(());
        for metrics in &batch {
            if let Err(err) = self.exporter.export(metrics) {
                result = Err(err);
            }
        }
        result
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.exporter.force_flush()
    }

    fn shutdown(&self, timeout: Duration) -> OTelSdkResult {
        self.exporter.shutdown_with_timeout(timeout)
    }
}

/// Exports collected metric snapshots in batches from a background thread.
///
/// ```
/// # #[cfg(feature = "testing")]
/// # {
/// use otel_sdk::metrics::data::ResourceMetrics;
/// use otel_sdk::metrics::{BatchMetricProcessor, InMemoryMetricExporter};
///
/// let exporter = InMemoryMetricExporter::default();
/// let processor = BatchMetricProcessor::builder(exporter.clone()).build().unwrap();
///
/// processor.receive_metrics(ResourceMetrics::default());
/// processor.force_flush().unwrap();
/// assert_eq!(exporter.get_finished_metrics().unwrap().len(), 1);
/// # processor.shutdown().unwrap();
/// # }
/// ```
pub struct BatchMetricProcessor {
    inner: BatchProcessor<ResourceMetrics>,
}

impl fmt::Debug for BatchMetricProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchMetricProcessor")
            .field("inner", &self.inner)
            .finish()
    }
}

impl BatchMetricProcessor {
    /// Starts configuring a processor around `exporter`.
    pub fn builder<E: PushMetricExporter>(exporter: E) -> BatchMetricProcessorBuilder<E> {
        BatchMetricProcessorBuilder {
            exporter,
            config: None,
        }
    }

    /// Queues a snapshot for export.
    pub fn receive_metrics(&self, metrics: ResourceMetrics) {
        self.inner.emit(metrics);
    }

    /// Exports every queued snapshot, then flushes the exporter.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    /// Drains the queue and shuts the exporter down.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    /// Shuts down, waiting at most `timeout` for the final export.
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }
}

/// Builder for [`BatchMetricProcessor`].
#[derive(Debug)]
pub struct BatchMetricProcessorBuilder<E> {
    exporter: E,
    config: Option<BatchConfig>,
}

impl<E: PushMetricExporter> BatchMetricProcessorBuilder<E> {
    /// Sets the queue configuration.
    ///
    /// The `OTEL_BLRP_*` variables configure log batching only, so without
    /// this call the built-in defaults apply.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Starts the worker thread.
    pub fn build(self) -> Result<BatchMetricProcessor, OTelSdkError> {
        let config = match self.config {
            Some(config) => config,
            None => BatchConfigBuilder::new()
                .build()
                .map_err(|err| OTelSdkError::InternalFailure(err.to_string()))?,
        };
        let adapter = Arc::new(MetricExportAdapter {
            exporter: Box::new(self.exporter),
        });
        let inner = BatchProcessor::new(adapter, config, "Metrics")?;
        Ok(BatchMetricProcessor { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::reader::MetricReader;
    use crate::metrics::{InMemoryMetricExporter, ManualReader, SdkMeterProvider, Temporality};
    use crate::Resource;
    use otel_core::metrics::MeterProvider;
    use otel_core::{Key, KeyValue, Value};
    use std::sync::{mpsc, Mutex};

    /// Blocks every export until the test lets it through.
    #[derive(Debug)]
    struct GatedExporter {
        inner: InMemoryMetricExporter,
        started: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl PushMetricExporter for GatedExporter {
        async fn export(&self, metrics: &ResourceMetrics) -> OTelSdkResult {
            let _ = self.started.lock().unwrap().send(());
            let _ = self
                .gate
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
            PushMetricExporter::export(&self.inner, metrics).await
        }

        fn force_flush(&self) -> OTelSdkResult {
            Ok(())
        }

        fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
            Ok(())
        }

        fn temporality(&self) -> Temporality {
            Temporality::Cumulative
        }
    }

    fn snapshot(seq: i64) -> ResourceMetrics {
        ResourceMetrics {
            resource: Resource::builder()
                .with_attribute(KeyValue::new("seq", seq))
                .build(),
            scope_metrics: Vec::new(),
        }
    }

    fn seq(rm: &ResourceMetrics) -> Option<i64> {
        match rm.resource.get(&Key::new("seq")) {
            Some(Value::I64(seq)) => Some(seq),
            _ => None,
        }
    }

    #[test]
    fn exports_collected_snapshots() {
        let reader = ManualReader::builder().build();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        let counter = provider.meter("batch").u64_counter("jobs").build();

        let exporter = InMemoryMetricExporter::default();
        let processor = BatchMetricProcessor::builder(exporter.clone())
            .build()
            .unwrap();

        for _ in 0..3 {
            counter.add(1, &[]);
            let mut rm = ResourceMetrics::default();
            reader.collect(&mut rm).unwrap();
            processor.receive_metrics(rm);
        }
        processor.force_flush().unwrap();

        let exported = exporter.get_finished_metrics().unwrap();
        assert_eq!(exported.len(), 3);
        assert!(exported
            .iter()
            .all(|rm| rm.scope_metrics[0].metrics[0].name == "jobs"));
        processor.shutdown().unwrap();
    }

    #[test]
    fn shutdown_shuts_exporter_down() {
        let exporter = InMemoryMetricExporter::default();
        let processor = BatchMetricProcessor::builder(exporter.clone())
            .build()
            .unwrap();

        processor.receive_metrics(ResourceMetrics::default());
        processor.shutdown().unwrap();
        assert_eq!(exporter.get_finished_metrics().unwrap().len(), 1);
        assert!(matches!(
            processor.shutdown(),
            Err(OTelSdkError::AlreadyShutdown)
        ));

        // dropped with a warning
        processor.receive_metrics(ResourceMetrics::default());
        assert_eq!(exporter.get_finished_metrics().unwrap().len(), 1);
    }

    #[test]
    fn full_queue_drops_oldest_snapshots_while_exporter_is_busy() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let in_memory = InMemoryMetricExporter::default();
        let exporter = GatedExporter {
            inner: in_memory.clone(),
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
        };
        let processor = BatchMetricProcessor::builder(exporter)
            .with_batch_config(
                BatchConfigBuilder::new()
                    .with_max_queue_size(3)
                    .with_max_export_batch_size(1)
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();

        // the worker takes the first snapshot and blocks in the exporter
        processor.receive_metrics(snapshot(0));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for i in 1..=5 {
            processor.receive_metrics(snapshot(i));
        }
        assert_eq!(processor.inner.queue_len(), 3);
        assert_eq!(processor.inner.dropped_count(), 2);

        drop(started_rx);
        for _ in 0..4 {
            let _ = gate_tx.send(());
        }
        processor.shutdown().unwrap();

        let exported: Vec<i64> = in_memory
            .get_finished_metrics()
            .unwrap()
            .iter()
            .filter_map(seq)
            .collect();
        assert_eq!(exported, vec![0, 3, 4, 5]);
    }
}
