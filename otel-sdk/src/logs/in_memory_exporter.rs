use crate::error::{OTelSdkError, OTelSdkResult};
use crate::logs::{LogBatch, LogExporter, SdkLogRecord};
use crate::Resource;
use otel_core::InstrumentationScope;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A log exporter that keeps everything it receives in memory.
///
/// Clones share storage, so a test can hand one clone to a processor and
/// inspect the other.
///
/// ```
/// # #[cfg(feature = "testing")]
/// # {
/// use otel_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};
///
/// let exporter = InMemoryLogExporter::default();
/// let provider = SdkLoggerProvider::builder()
///     .with_simple_exporter(exporter.clone())
///     .build();
///
/// let logger = provider.logger("example");
/// let mut record = logger.create_log_record();
/// record.set_body("hello");
/// logger.emit(record);
///
/// assert_eq!(exporter.get_emitted_logs().unwrap().len(), 1);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryLogExporter {
    logs: Arc<Mutex<Vec<LogDataWithResource>>>,
    resource: Arc<Mutex<Resource>>,
    should_reset_on_shutdown: bool,
}

impl Default for InMemoryLogExporter {
    fn default() -> Self {
        InMemoryLogExporterBuilder::new().build()
    }
}

/// A record as exported, with its scope and the provider's resource.
#[derive(Clone, Debug)]
pub struct LogDataWithResource {
    /// Log record
    pub record: SdkLogRecord,
    /// Scope of the logger that emitted the record.
    pub instrumentation: InstrumentationScope,
    /// Resource of the provider.
    pub resource: Resource,
}

/// Builder for [`InMemoryLogExporter`].
#[derive(Debug, Clone)]
pub struct InMemoryLogExporterBuilder {
    reset_on_shutdown: bool,
}

impl Default for InMemoryLogExporterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogExporterBuilder {
    /// A builder whose exporter clears its storage on shutdown.
    pub fn new() -> Self {
        Self {
            reset_on_shutdown: true,
        }
    }

    /// Keeps exported records after shutdown so tests can inspect them.
    pub fn keep_records_on_shutdown(mut self) -> Self {
        self.reset_on_shutdown = false;
        self
    }

    /// Creates the exporter.
    pub fn build(&self) -> InMemoryLogExporter {
        InMemoryLogExporter {
            logs: Arc::new(Mutex::new(Vec::new())),
            resource: Arc::new(Mutex::new(Resource::empty())),
            should_reset_on_shutdown: self.reset_on_shutdown,
        }
    }
}

impl InMemoryLogExporter {
    /// Returns a copy of every record exported so far.
    pub fn get_emitted_logs(&self) -> Result<Vec<LogDataWithResource>, OTelSdkError> {
        Ok(self.logs.lock()?.clone())
    }

    /// Clears the stored records.
    pub fn reset(&self) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.clear();
        }
    }
}

impl LogExporter for InMemoryLogExporter {
    async fn export(&self, batch: LogBatch<'_>) -> OTelSdkResult {
        let resource = self.resource.lock()?.clone();
        let mut logs = self.logs.lock()?;
        for (record, instrumentation) in batch.iter() {
            logs.push(LogDataWithResource {
                record: record.clone(),
                instrumentation: instrumentation.clone(),
                resource: resource.clone(),
            });
        }
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        if self.should_reset_on_shutdown {
            self.reset();
        }
        Ok(())
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut current) = self.resource.lock() {
            *current = resource.clone();
        }
    }
}
