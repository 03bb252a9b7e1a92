//! # Log pipeline
//!
//! An [`SdkLoggerProvider`] hands every record emitted through its
//! [`SdkLogger`]s to the configured [`LogProcessor`]s. The
//! [`BatchLogProcessor`] queues records and exports them in batches from a
//! background thread; the [`SimpleLogProcessor`] exports each record inline.
mod batch_log_processor;
mod export;
#[cfg(any(test, feature = "testing"))]
mod in_memory_exporter;
mod log_processor;
mod logger_provider;
mod record;

pub use batch_log_processor::{BatchLogProcessor, BatchLogProcessorBuilder};
pub use export::{LogBatch, LogExporter};
#[cfg(any(test, feature = "testing"))]
pub use in_memory_exporter::{InMemoryLogExporter, InMemoryLogExporterBuilder, LogDataWithResource};
pub use log_processor::{LogProcessor, SimpleLogProcessor};
pub use logger_provider::{LoggerProviderBuilder, SdkLogger, SdkLoggerProvider};
#[cfg(feature = "trace")]
pub use record::TraceContext;
pub use record::{SdkLogRecord, Severity};

pub use crate::export::{BatchConfig, BatchConfigBuilder};
