use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
};

use otel_core::otel_debug;

use crate::error::{OTelSdkError, OTelSdkResult};

use super::{
    data::ResourceMetrics,
    pipeline::Pipeline,
    reader::{MetricReader, SdkProducer},
    InstrumentKind, Temporality,
};

/// A simple [MetricReader] that allows an application to read metrics on demand.
///
/// Clones share the same registration, so one clone can be handed to the
/// provider and another kept to call [`collect`](MetricReader::collect).
///
/// # Example
///
/// ```
/// use otel_sdk::metrics::{ManualReader, Temporality};
///
/// let reader = ManualReader::builder()
///     .with_temporality(Temporality::Delta)
///     .build();
/// # drop(reader)
/// ```
#[derive(Clone)]
pub struct ManualReader {
    inner: Arc<Mutex<ManualReaderInner>>,
    temporality: Temporality,
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ManualReader")
    }
}

#[derive(Debug, Default)]
struct ManualReaderInner {
    sdk_producer: Option<Weak<dyn SdkProducer>>,
    is_shutdown: bool,
}

impl ManualReader {
    /// Configuration for this reader
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }

    /// A [MetricReader] which is directly called to collect metrics.
    pub(crate) fn new(temporality: Temporality) -> Self {
        ManualReader {
            inner: Arc::new(Mutex::new(ManualReaderInner::default())),
            temporality,
        }
    }
}

impl MetricReader for ManualReader {
    ///  Register a pipeline which enables the caller to read metrics from the SDK
    ///  on demand.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let _ = self.inner.lock().map(|mut inner| {
            // Only register once. If producer is already set, do nothing.
            if inner.sdk_producer.is_none() {
                inner.sdk_producer = Some(pipeline);
            } else {
                otel_debug!(
                    name: "ManualReader.DuplicateRegistration",
                    message = "The pipeline is already registered to the Reader. Registering pipeline multiple times is not allowed."
                );
            }
        });
    }

    /// Gathers all metrics from the SDK, calling any callbacks necessary and
    /// returning the results.
    ///
    /// Returns an error if called after shutdown.
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        let inner = self.inner.lock()?;
        if inner.is_shutdown {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        match &inner.sdk_producer.as_ref().and_then(|w| w.upgrade()) {
            Some(producer) => producer.produce(rm),
            None => Err(OTelSdkError::InternalFailure(
                "reader is not registered with a meter provider".into(),
            )),
        }
    }

    /// ForceFlush is a no-op, it always returns Ok.
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    /// Closes any connections and frees any resources used by the reader.
    fn shutdown(&self) -> OTelSdkResult {
        let mut inner = self.inner.lock()?;
        if inner.is_shutdown {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        // Any future call to collect will now return an error.
        inner.sdk_producer = None;
        inner.is_shutdown = true;

        Ok(())
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        kind.temporality_preference(self.temporality)
    }
}

/// Configuration for a [ManualReader]
#[derive(Debug, Default)]
pub struct ManualReaderBuilder {
    temporality: Temporality,
}

impl ManualReaderBuilder {
    /// New manual builder configuration
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the [Temporality] of the reader, cumulative by default.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Create a new [ManualReader] from this configuration.
    pub fn build(self) -> ManualReader {
        ManualReader::new(self.temporality)
    }
}
