//! Log processors: the stage between an [`SdkLogger`](super::SdkLogger) and
//! a [`LogExporter`].
//!
//! ```ascii
//!   +-----+---------------+   +-----------------------+   +-------------------+
//!   |     |               |   |                       |   |                   |
//!   | SDK | Logger.emit() +--->     LogProcessor      +--->    LogExporter    |
//!   +-----+---------------+   +-----------------------+   +-------------------+
//! ```
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::logs::{LogBatch, LogExporter, SdkLogRecord};
use crate::Resource;
use otel_core::{otel_error, otel_warn, InstrumentationScope};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Receives every record emitted through the provider's loggers.
///
/// Processors run in registration order and may modify the record; later
/// processors see the changes.
pub trait LogProcessor: Send + Sync + Debug {
    /// Called when a log record is ready to be processed and exported.
    fn emit(&self, data: &mut SdkLogRecord, instrumentation: &InstrumentationScope);
    /// Force the logs lying in the cache to be exported.
    fn force_flush(&self) -> OTelSdkResult;
    /// Shuts down the processor. Records emitted afterwards are dropped.
    fn shutdown(&self) -> OTelSdkResult;
    /// Set the resource for the log processor.
    fn set_resource(&mut self, _resource: &Resource) {}
}

/// Exports each record synchronously on the emitting thread. Meant for
/// debugging and tests.
#[derive(Debug)]
pub struct SimpleLogProcessor<T: LogExporter> {
    exporter: Mutex<T>,
    is_shutdown: AtomicBool,
}

impl<T: LogExporter> SimpleLogProcessor<T> {
    /// Creates a new instance of `SimpleLogProcessor`.
    pub fn new(exporter: T) -> Self {
        SimpleLogProcessor {
            exporter: Mutex::new(exporter),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

impl<T: LogExporter> LogProcessor for SimpleLogProcessor<T> {
    fn emit(&self, record: &mut SdkLogRecord, instrumentation: &InstrumentationScope) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            otel_warn!(name: "SimpleLogProcessor.Emit.ProcessorShutdown");
            return;
        }

        let result = self
            .exporter
            .lock()
            .map_err(OTelSdkError::from)
            .and_then(|exporter| {
                let log_tuple = &[(record as &SdkLogRecord, instrumentation)];
                futures_executor::block_on(exporter.export(LogBatch::new(log_tuple)))
            });
        if let Err(err) = result {
            otel_error!(
                name: "SimpleLogProcessor.Emit.ExportError",
                error = format!("{}", err)
            );
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.exporter.lock()?.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.exporter.lock()?.shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.set_resource(resource);
        }
    }
}
