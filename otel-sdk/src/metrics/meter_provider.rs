use core::fmt;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use otel_core::{
    metrics::{noop::NoopMeter, Meter, MeterProvider},
    otel_debug, otel_error, otel_info, InstrumentationScope,
};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::Resource;

use super::{
    exporter::PushMetricExporter, meter::SdkMeter, pipeline::Pipelines, reader::MetricReader,
    view::View, PeriodicReader,
};

/// Handles the creation and coordination of [Meter]s.
///
/// All `Meter`s created by a `SdkMeterProvider` are associated with the same
/// [Resource], have the same [View]s applied to them, and have their produced
/// metric telemetry passed to the configured [MetricReader]s. Cloning the
/// provider creates a new handle to the same instance. Dropping the last
/// handle shuts the provider down.
///
/// ```
/// use otel_sdk::metrics::SdkMeterProvider;
///
/// let provider = SdkMeterProvider::default();
/// // no readers, nothing is exported
/// provider.force_flush().unwrap();
/// provider.shutdown().unwrap();
/// assert!(provider.shutdown().is_err());
/// ```
#[derive(Clone, Debug)]
pub struct SdkMeterProvider {
    inner: Arc<SdkMeterProviderInner>,
}

struct SdkMeterProviderInner {
    pipes: Arc<Pipelines>,
    meters: Mutex<HashMap<InstrumentationScope, Arc<SdkMeter>>>,
    shutdown_invoked: AtomicBool,
}

impl fmt::Debug for SdkMeterProviderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkMeterProviderInner")
            .field("pipes", &self.pipes)
            .field("shutdown_invoked", &self.shutdown_invoked)
            .finish()
    }
}

impl Default for SdkMeterProvider {
    fn default() -> Self {
        SdkMeterProvider::builder().build()
    }
}

impl SdkMeterProvider {
    /// Return default [MeterProviderBuilder]
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Flushes all pending telemetry through every reader.
    ///
    /// There is no guarantee that all telemetry is flushed on error.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    /// Shuts down every reader, flushing pending telemetry.
    ///
    /// The first call performs the shutdown. Later calls return
    /// [`OTelSdkError::AlreadyShutdown`]. Meters requested afterwards record
    /// nothing.
    pub fn shutdown(&self) -> OTelSdkResult {
        otel_info!(
            name: "MeterProvider.Shutdown",
            message = "User initiated shutdown of MeterProvider."
        );
        self.inner.shutdown()
    }
}

impl SdkMeterProviderInner {
    fn force_flush(&self) -> OTelSdkResult {
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            Err(OTelSdkError::AlreadyShutdown)
        } else {
            self.pipes.force_flush()
        }
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.shutdown_invoked.swap(true, Ordering::SeqCst) {
            Err(OTelSdkError::AlreadyShutdown)
        } else {
            self.pipes.shutdown()
        }
    }
}

impl Drop for SdkMeterProviderInner {
    fn drop(&mut self) {
        if self.shutdown_invoked.load(Ordering::Relaxed) {
            otel_debug!(name: "MeterProvider.Drop.AlreadyShutdown");
            return;
        }
        otel_info!(
            name: "MeterProvider.Drop",
            message = "Last reference of MeterProvider dropped, initiating shutdown."
        );
        if let Err(err) = self.shutdown() {
            otel_error!(
                name: "MeterProvider.Drop.ShutdownFailed",
                reason = format!("{err}")
            );
        }
    }
}

impl MeterProvider for SdkMeterProvider {
    fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if self.inner.shutdown_invoked.load(Ordering::Relaxed) {
            otel_debug!(
                name: "MeterProvider.NoOpMeterReturned",
                meter_name = scope.name(),
            );
            return Meter::new(Arc::new(NoopMeter::new()));
        }

        let Ok(mut meters) = self.inner.meters.lock() else {
            return Meter::new(Arc::new(NoopMeter::new()));
        };
        let meter = meters
            .entry(scope)
            .or_insert_with_key(|scope| {
                otel_debug!(
                    name: "MeterProvider.NewMeterCreated",
                    meter_name = scope.name(),
                );
                Arc::new(SdkMeter::new(scope.clone(), Arc::clone(&self.inner.pipes)))
            })
            .clone();
        Meter::new(meter)
    }
}

/// Configuration options for a [SdkMeterProvider].
#[derive(Default)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    readers: Vec<Box<dyn MetricReader>>,
    views: Vec<Arc<dyn View>>,
}

impl MeterProviderBuilder {
    /// Associates a [Resource] with the provider. An empty resource is used
    /// when none is set.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Associates a [MetricReader] with the provider. Each reader gets its
    /// own pipeline and aggregation state.
    ///
    /// A provider without readers exports nothing.
    pub fn with_reader<T: MetricReader>(mut self, reader: T) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    /// Adds a [PushMetricExporter] behind a [PeriodicReader] with the interval
    /// and timeout taken from `OTEL_METRIC_EXPORT_INTERVAL` and
    /// `OTEL_METRIC_EXPORT_TIMEOUT`.
    pub fn with_periodic_exporter<T>(self, exporter: T) -> Self
    where
        T: PushMetricExporter,
    {
        let reader = PeriodicReader::builder(exporter).build();
        self.with_reader(reader)
    }

    /// Adds a [View]. Every instrument is matched against every view, and
    /// instruments no view matches use the default stream.
    pub fn with_view<T: View>(mut self, view: T) -> Self {
        self.views.push(Arc::new(view));
        self
    }

    /// Construct a new [SdkMeterProvider] with this configuration.
    pub fn build(self) -> SdkMeterProvider {
        otel_debug!(
            name: "MeterProvider.Building",
            readers = self.readers.len(),
            views = self.views.len(),
        );
        SdkMeterProvider {
            inner: Arc::new(SdkMeterProviderInner {
                pipes: Arc::new(Pipelines::new(
                    self.resource.unwrap_or_default(),
                    self.readers,
                    self.views,
                )),
                meters: Default::default(),
                shutdown_invoked: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("resource", &self.resource)
            .field("readers", &self.readers)
            .field("views", &self.views.len())
            .finish()
    }
}
