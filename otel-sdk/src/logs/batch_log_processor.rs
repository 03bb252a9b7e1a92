//! # Batch log processor
//!
//! Copies each emitted record into a bounded queue and exports the queue in
//! batches from a dedicated thread named `OpenTelemetry.Logs.BatchProcessor`.
//!
//! ```ascii
//!   +-----+---------------+   +----------------+   +-----------------------+
//!   | SDK | Logger.emit() +---> queue (bounded) +---> worker: LogExporter   |
//!   +-----+---------------+   +----------------+   +-----------------------+
//! ```
//!
//! The queue is configured with [`BatchConfig`], whose defaults can be
//! overridden by the `OTEL_BLRP_*` environment variables.
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::export::{BatchConfig, BatchExporter, BatchProcessor};
use crate::logs::{LogBatch, LogExporter, LogProcessor, SdkLogRecord};
use crate::Resource;
use otel_core::InstrumentationScope;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

type LogEntry = Box<(SdkLogRecord, InstrumentationScope)>;

struct LogExportAdapter<E> {
    exporter: RwLock<E>,
}

impl<E: LogExporter> BatchExporter<LogEntry> for LogExportAdapter<E> {
    fn export(&self, batch: Vec<LogEntry>) -> OTelSdkResult {
        let exporter = self.exporter.read()?;
        futures_executor::block_on(exporter.export(LogBatch::new_with_owned_data(&batch)))
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.exporter.read()?.force_flush()
    }

    fn shutdown(&self, timeout: Duration) -> OTelSdkResult {
        self.exporter.read()?.shutdown_with_timeout(timeout)
    }
}

/// The exporter half that accepts the provider's resource.
trait ResourceSink: Send + Sync {
    fn set_resource(&self, resource: &Resource);
}

impl<E: LogExporter> ResourceSink for LogExportAdapter<E> {
    fn set_resource(&self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.write() {
            exporter.set_resource(resource);
        }
    }
}

/// A [`LogProcessor`] that exports records in batches from a background
/// thread.
///
/// ```
/// # #[cfg(feature = "testing")]
/// # {
/// use otel_sdk::logs::{BatchConfigBuilder, BatchLogProcessor, InMemoryLogExporter, SdkLoggerProvider};
/// use std::time::Duration;
///
/// let exporter = InMemoryLogExporter::default();
/// let processor = BatchLogProcessor::builder(exporter.clone())
///     .with_batch_config(
///         BatchConfigBuilder::default()
///             .with_max_queue_size(4096)
///             .with_scheduled_delay(Duration::from_millis(500))
///             .build()
///             .unwrap(),
///     )
///     .build()
///     .unwrap();
///
/// let provider = SdkLoggerProvider::builder()
///     .with_log_processor(processor)
///     .build();
/// # provider.shutdown().unwrap();
/// # }
/// ```
pub struct BatchLogProcessor {
    inner: BatchProcessor<LogEntry>,
    resource_sink: Arc<dyn ResourceSink>,
}

impl fmt::Debug for BatchLogProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchLogProcessor")
            .field("inner", &self.inner)
            .finish()
    }
}

impl BatchLogProcessor {
    /// Starts configuring a processor around `exporter`.
    pub fn builder<E: LogExporter>(exporter: E) -> BatchLogProcessorBuilder<E> {
        BatchLogProcessorBuilder {
            exporter,
            config: None,
        }
    }

    /// Shuts down, waiting at most `timeout` for the final export.
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    /// Discards queued records and restarts the worker. Call from the child
    /// after a fork.
    pub fn reinit_after_fork(&self) -> OTelSdkResult {
        self.inner.reinit_after_fork()
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.inner.queue_len()
    }
}

impl LogProcessor for BatchLogProcessor {
    fn emit(&self, record: &mut SdkLogRecord, instrumentation: &InstrumentationScope) {
        self.inner
            .emit(Box::new((record.clone(), instrumentation.clone())));
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource_sink.set_resource(resource);
    }
}

/// Builder for [`BatchLogProcessor`].
#[derive(Debug)]
pub struct BatchLogProcessorBuilder<E> {
    exporter: E,
    config: Option<BatchConfig>,
}

impl<E: LogExporter> BatchLogProcessorBuilder<E> {
    /// Replaces the configuration read from the environment.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Starts the worker thread.
    pub fn build(self) -> Result<BatchLogProcessor, OTelSdkError> {
        let config = self.config.unwrap_or_default();
        let adapter = Arc::new(LogExportAdapter {
            exporter: RwLock::new(self.exporter),
        });
        let inner = BatchProcessor::new(adapter.clone(), config, "Logs")?;
        Ok(BatchLogProcessor {
            inner,
            resource_sink: adapter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::BatchConfigBuilder;
    use crate::logs::{InMemoryLogExporter, InMemoryLogExporterBuilder, SdkLoggerProvider};
    use otel_core::{KeyValue, Value};
    use std::thread;
    use std::time::Instant;

    fn record(body: &'static str) -> SdkLogRecord {
        let mut record = SdkLogRecord::new();
        record.set_body(body);
        record
    }

    fn wait_for_logs(exporter: &InMemoryLogExporter, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if exporter.get_emitted_logs().unwrap().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn full_batch_exports_before_scheduled_delay() {
        let exporter = InMemoryLogExporter::default();
        let processor = BatchLogProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::new()
                    .with_max_export_batch_size(5)
                    .with_max_queue_size(10)
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let scope = InstrumentationScope::builder("test").build();

        for _ in 0..5 {
            processor.emit(&mut record("batched"), &scope);
        }

        assert!(wait_for_logs(&exporter, 5));
        assert_eq!(processor.queue_len(), 0);
        processor.shutdown().unwrap();
    }

    #[test]
    fn shutdown_flushes_pending_records() {
        let exporter = InMemoryLogExporterBuilder::new()
            .keep_records_on_shutdown()
            .build();
        let processor = BatchLogProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::new()
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let scope = InstrumentationScope::builder("test").build();

        processor.emit(&mut record("one"), &scope);
        processor.emit(&mut record("two"), &scope);
        processor.shutdown().unwrap();

        let bodies: Vec<_> = exporter
            .get_emitted_logs()
            .unwrap()
            .into_iter()
            .filter_map(|log| log.record.body)
            .collect();
        assert_eq!(bodies, vec![Value::from("one"), Value::from("two")]);
    }

    #[test]
    fn force_flush_exports_pending_records() {
        let exporter = InMemoryLogExporter::default();
        let processor = BatchLogProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::new()
                    .with_scheduled_delay(Duration::from_secs(60))
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let scope = InstrumentationScope::builder("test").build();

        processor.emit(&mut record("pending"), &scope);
        processor.force_flush().unwrap();

        assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
        processor.shutdown().unwrap();
    }

    #[test]
    fn exported_records_carry_provider_resource() {
        let exporter = InMemoryLogExporter::default();
        let processor = BatchLogProcessor::builder(exporter.clone())
            .build()
            .unwrap();
        let provider = SdkLoggerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_attribute(KeyValue::new("service.name", "checkout"))
                    .build(),
            )
            .with_log_processor(processor)
            .build();

        let logger = provider.logger("test");
        let mut log = logger.create_log_record();
        log.set_body("with resource");
        logger.emit(log);
        provider.force_flush().unwrap();

        let logs = exporter.get_emitted_logs().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].resource.get(&"service.name".into()),
            Some(Value::from("checkout"))
        );
        provider.shutdown().unwrap();
    }
}
