use super::{BatchLogProcessor, LogProcessor, SdkLogRecord, SimpleLogProcessor};
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::logs::LogExporter;
use crate::Resource;
use otel_core::{otel_debug, otel_error, otel_info, InstrumentationScope};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

// handed out once the provider is shut down
static NOOP_LOGGER_PROVIDER: OnceLock<SdkLoggerProvider> = OnceLock::new();

#[inline]
fn noop_logger_provider() -> &'static SdkLoggerProvider {
    NOOP_LOGGER_PROVIDER.get_or_init(|| SdkLoggerProvider {
        inner: Arc::new(LoggerProviderInner {
            processors: Vec::new(),
            resource: Resource::empty(),
            is_shutdown: AtomicBool::new(true),
        }),
    })
}

/// Creates [`SdkLogger`]s that share a [`Resource`] and a list of
/// [`LogProcessor`]s.
///
/// Cloning yields another handle to the same provider. Dropping the last
/// handle shuts the provider down, flushing what remains.
#[derive(Debug, Clone)]
pub struct SdkLoggerProvider {
    inner: Arc<LoggerProviderInner>,
}

impl SdkLoggerProvider {
    /// Create a new `LoggerProvider` builder.
    pub fn builder() -> LoggerProviderBuilder {
        LoggerProviderBuilder::default()
    }

    /// Returns a logger for the scope named `name`.
    pub fn logger(&self, name: impl Into<Cow<'static, str>>) -> SdkLogger {
        self.logger_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Returns a logger for `scope`.
    pub fn logger_with_scope(&self, scope: InstrumentationScope) -> SdkLogger {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            otel_debug!(
                name: "LoggerProvider.NoOpLoggerReturned",
                logger_name = scope.name()
            );
            return SdkLogger::new(scope, noop_logger_provider().clone());
        }
        if scope.name().is_empty() {
            otel_info!(name: "LoggerNameEmpty", message = "Logger name is empty; consider providing a meaningful name.");
        }
        SdkLogger::new(scope, self.clone())
    }

    pub(crate) fn log_processors(&self) -> &[Box<dyn LogProcessor>] {
        &self.inner.processors
    }

    /// The resource shared by every logger of this provider.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Force flush all remaining logs in log processors and return results.
    pub fn force_flush(&self) -> OTelSdkResult {
        let errors: Vec<_> = self
            .log_processors()
            .iter()
            .filter_map(|processor| processor.force_flush().err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("errs: {:?}", errors)))
        }
    }

    /// Shuts down every processor. A second call returns
    /// [`OTelSdkError::AlreadyShutdown`].
    pub fn shutdown(&self) -> OTelSdkResult {
        otel_debug!(name: "LoggerProvider.ShutdownInvokedByUser");
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        let errors: Vec<_> = self
            .inner
            .shutdown()
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!(
                "Shutdown errors: {:?}",
                errors
            )))
        }
    }
}

#[derive(Debug)]
struct LoggerProviderInner {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Resource,
    is_shutdown: AtomicBool,
}

impl LoggerProviderInner {
    fn shutdown(&self) -> Vec<OTelSdkResult> {
        self.processors
            .iter()
            .map(|processor| {
                let result = processor.shutdown();
                if let Err(err) = &result {
                    otel_debug!(
                        name: "LoggerProvider.ShutdownError",
                        error = format!("{}", err)
                    );
                }
                result
            })
            .collect()
    }
}

impl Drop for LoggerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.swap(true, Ordering::Relaxed) {
            otel_info!(
                name: "LoggerProvider.Drop",
                message = "Last reference of LoggerProvider dropped, initiating shutdown."
            );
            let _ = self.shutdown();
        }
    }
}

/// Builder for [`SdkLoggerProvider`].
#[derive(Debug, Default)]
pub struct LoggerProviderBuilder {
    processors: Vec<Box<dyn LogProcessor>>,
    resource: Option<Resource>,
}

impl LoggerProviderBuilder {
    /// Adds a [`SimpleLogProcessor`] exporting through `exporter`.
    ///
    /// Processors are invoked in the order they are added.
    pub fn with_simple_exporter<T: LogExporter>(self, exporter: T) -> Self {
        self.with_log_processor(SimpleLogProcessor::new(exporter))
    }

    /// Adds a [`BatchLogProcessor`] exporting through `exporter`, configured
    /// from the environment.
    ///
    /// If the worker thread cannot be started the error is logged and the
    /// exporter is not added.
    pub fn with_batch_exporter<T: LogExporter>(self, exporter: T) -> Self {
        match BatchLogProcessor::builder(exporter).build() {
            Ok(processor) => self.with_log_processor(processor),
            Err(err) => {
                otel_error!(
                    name: "LoggerProvider.BatchProcessorCreationFailed",
                    error = format!("{}", err)
                );
                self
            }
        }
    }

    /// Adds a custom [`LogProcessor`].
    ///
    /// Processors are invoked in the order they are added.
    pub fn with_log_processor<T: LogProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// The `Resource` to be associated with this Provider.
    pub fn with_resource(self, resource: Resource) -> Self {
        LoggerProviderBuilder {
            resource: Some(resource),
            ..self
        }
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> SdkLoggerProvider {
        let resource = self.resource.unwrap_or_else(Resource::empty);
        let mut processors = self.processors;
        for processor in processors.iter_mut() {
            processor.set_resource(&resource);
        }

        otel_debug!(name: "LoggerProvider.Built", processor_count = processors.len());
        SdkLoggerProvider {
            inner: Arc::new(LoggerProviderInner {
                processors,
                resource,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

/// Emits records on behalf of one instrumentation scope.
#[derive(Debug, Clone)]
pub struct SdkLogger {
    scope: InstrumentationScope,
    provider: SdkLoggerProvider,
}

impl SdkLogger {
    pub(crate) fn new(scope: InstrumentationScope, provider: SdkLoggerProvider) -> Self {
        SdkLogger { scope, provider }
    }

    /// The scope attached to every record of this logger.
    pub fn instrumentation_scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Creates an empty record to fill in and pass to [`SdkLogger::emit`].
    pub fn create_log_record(&self) -> SdkLogRecord {
        SdkLogRecord::new()
    }

    /// Stamps the observed time if unset and hands the record to each
    /// processor in turn.
    pub fn emit(&self, mut record: SdkLogRecord) {
        if record.observed_timestamp.is_none() {
            record.observed_timestamp = Some(SystemTime::now());
        }
        for processor in self.provider.log_processors() {
            processor.emit(&mut record, &self.scope);
        }
    }
}
