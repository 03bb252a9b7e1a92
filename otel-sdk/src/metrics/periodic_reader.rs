use std::{
    env, fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use otel_core::{otel_debug, otel_error, otel_info, otel_warn};

use crate::error::{OTelSdkError, OTelSdkResult};

use super::{
    data::ResourceMetrics,
    exporter::{BlockingExporter, PushMetricExporter},
    instrument::InstrumentKind,
    reader::{MetricReader, SdkProducer},
    Pipeline, Temporality,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

const METRIC_EXPORT_INTERVAL_NAME: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const METRIC_EXPORT_TIMEOUT_NAME: &str = "OTEL_METRIC_EXPORT_TIMEOUT";

/// Configuration options for [PeriodicReader].
///
/// The interval and timeout start from the `OTEL_METRIC_EXPORT_INTERVAL` and
/// `OTEL_METRIC_EXPORT_TIMEOUT` environment variables (milliseconds), falling
/// back to 60 and 30 seconds. Values set on the builder take precedence.
#[derive(Debug)]
pub struct PeriodicReaderBuilder<E> {
    interval: Duration,
    timeout: Duration,
    exporter: E,
}

impl<E> PeriodicReaderBuilder<E>
where
    E: PushMetricExporter,
{
    fn new(exporter: E) -> Self {
        PeriodicReaderBuilder {
            interval: duration_from_env(METRIC_EXPORT_INTERVAL_NAME).unwrap_or(DEFAULT_INTERVAL),
            timeout: duration_from_env(METRIC_EXPORT_TIMEOUT_NAME).unwrap_or(DEFAULT_TIMEOUT),
            exporter,
        }
    }

    /// Configures the intervening time between exports for a [PeriodicReader].
    ///
    /// This option overrides any value set for the `OTEL_METRIC_EXPORT_INTERVAL`
    /// environment variable. A zero interval is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Configures how long flush and shutdown wait for an export to complete.
    ///
    /// This option overrides any value set for the `OTEL_METRIC_EXPORT_TIMEOUT`
    /// environment variable. A zero timeout is ignored.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Create a [PeriodicReader] with the given config.
    pub fn build(self) -> PeriodicReader {
        PeriodicReader::new(self.exporter, self.interval, self.timeout)
    }
}

fn duration_from_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// A [MetricReader] that continuously collects and exports metric data at a set
/// interval.
///
/// Collection and export run on a dedicated thread named
/// `OpenTelemetry.Metrics.PeriodicReader`. The export time is not counted
/// towards the interval. [`force_flush`](MetricReader::force_flush) exports
/// right away, and shutdown performs a final export before shutting the
/// exporter down.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "testing")]
/// # {
/// use otel_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
/// use std::time::Duration;
///
/// let exporter = InMemoryMetricExporter::default();
/// let reader = PeriodicReader::builder(exporter)
///     .with_interval(Duration::from_secs(10))
///     .build();
///
/// let provider = SdkMeterProvider::builder().with_reader(reader).build();
/// # provider.shutdown().unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PeriodicReader {
    inner: Arc<PeriodicReaderInner>,
}

impl PeriodicReader {
    /// Configuration options for a periodic reader
    pub fn builder<E>(exporter: E) -> PeriodicReaderBuilder<E>
    where
        E: PushMetricExporter,
    {
        PeriodicReaderBuilder::new(exporter)
    }

    fn new<E>(exporter: E, interval: Duration, timeout: Duration) -> Self
    where
        E: PushMetricExporter,
    {
        let (message_sender, message_receiver): (Sender<Message>, Receiver<Message>) =
            mpsc::channel();
        let exporter: Arc<dyn BlockingExporter> = Arc::new(exporter);
        let reader = PeriodicReader {
            inner: Arc::new(PeriodicReaderInner {
                temporality: exporter.temporality(),
                exporter,
                message_sender,
                producer: Mutex::new(None),
                is_shutdown: AtomicBool::new(false),
                timeout,
            }),
        };
        let weak_inner = Arc::downgrade(&reader.inner);

        let result_thread_creation = thread::Builder::new()
            .name("OpenTelemetry.Metrics.PeriodicReader".to_string())
            .spawn(move || run_worker(weak_inner, message_receiver, interval));

        if let Err(err) = result_thread_creation {
            // flush and shutdown report the missing worker
            otel_error!(
                name: "PeriodicReader.ThreadStartError",
                error = format!("{err:?}")
            );
        }
        reader
    }
}

fn run_worker(inner: Weak<PeriodicReaderInner>, messages: Receiver<Message>, interval: Duration) {
    let mut interval_start = Instant::now();
    let mut remaining_interval = interval;
    otel_info!(
        name: "PeriodicReader.ThreadStarted",
        interval_in_millisecs = interval.as_millis() as u64,
    );

    loop {
        let message = messages.recv_timeout(remaining_interval);
        let Some(reader) = inner.upgrade() else {
            break;
        };

        match message {
            Ok(Message::Flush(response_sender)) => {
                otel_debug!(name: "PeriodicReader.ExportingDueToFlush");
                let _ = response_sender.send(reader.collect_and_export());

                // Keep the schedule unless the flush ran past it.
                let elapsed = interval_start.elapsed();
                if elapsed < interval {
                    remaining_interval = interval - elapsed;
                } else {
                    interval_start = Instant::now();
                    remaining_interval = Duration::ZERO;
                }
            }
            Ok(Message::Shutdown(response_sender)) => {
                otel_debug!(name: "PeriodicReader.ExportingDueToShutdown");
                let result = reader.collect_and_export();
                let shutdown = reader.exporter.shutdown_with_timeout(reader.timeout);
                let _ = response_sender.send(result.and(shutdown));
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let export_start = Instant::now();
                otel_debug!(name: "PeriodicReader.ExportingDueToTimer");
                let _ = reader.collect_and_export();

                let time_taken_for_export = export_start.elapsed();
                if time_taken_for_export > interval {
                    otel_debug!(name: "PeriodicReader.ExportTookLongerThanInterval");
                    remaining_interval = Duration::ZERO;
                } else {
                    remaining_interval = interval - time_taken_for_export;
                }
                interval_start = Instant::now();
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    otel_info!(name: "PeriodicReader.ThreadStopped");
}

impl fmt::Debug for PeriodicReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("exporter", &self.inner.exporter)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

struct PeriodicReaderInner {
    exporter: Arc<dyn BlockingExporter>,
    temporality: Temporality,
    message_sender: Sender<Message>,
    producer: Mutex<Option<Weak<dyn SdkProducer>>>,
    is_shutdown: AtomicBool,
    timeout: Duration,
}

impl PeriodicReaderInner {
    fn register_pipeline(&self, producer: Weak<dyn SdkProducer>) {
        match self.producer.lock() {
            Ok(mut inner) => *inner = Some(producer),
            Err(err) => {
                otel_error!(
                    name: "PeriodicReader.RegisterPipelineError",
                    error = format!("{err}")
                );
            }
        }
    }

    fn produce(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        let producer = self.producer.lock()?;
        match producer.as_ref() {
            Some(p) => p
                .upgrade()
                .ok_or_else(|| OTelSdkError::InternalFailure("pipeline is dropped".into()))?
                .produce(rm),
            None => Err(OTelSdkError::InternalFailure(
                "pipeline is not registered".into(),
            )),
        }
    }

    fn collect_and_export(&self) -> OTelSdkResult {
        let mut rm = ResourceMetrics::default();

        if let Err(err) = self.produce(&mut rm) {
            otel_warn!(
                name: "PeriodicReader.CollectError",
                error = format!("{err}")
            );
            return Err(err);
        }

        if rm.scope_metrics.is_empty() {
            otel_debug!(name: "PeriodicReader.NoMetricsCollected");
            return Ok(());
        }

        let export_start = Instant::now();
        let result = self.exporter.export(&rm);
        if export_start.elapsed() > self.timeout {
            otel_warn!(
                name: "PeriodicReader.ExportExceededTimeout",
                timeout_in_millisecs = self.timeout.as_millis() as u64,
            );
        }
        if let Err(err) = &result {
            otel_warn!(
                name: "PeriodicReader.ExportError",
                error = format!("{err}")
            );
        }
        result
    }

    /// Sends `message` to the worker and waits for its answer.
    fn request(&self, message: impl FnOnce(Sender<OTelSdkResult>) -> Message) -> OTelSdkResult {
        let (response_tx, response_rx) = mpsc::channel();
        self.message_sender
            .send(message(response_tx))
            .map_err(|_| OTelSdkError::InternalFailure("periodic reader thread is gone".into()))?;

        match response_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(OTelSdkError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(OTelSdkError::InternalFailure(
                "periodic reader thread stopped before responding".into(),
            )),
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.request(Message::Flush)
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.request(Message::Shutdown)
    }
}

#[derive(Debug)]
enum Message {
    Flush(Sender<OTelSdkResult>),
    Shutdown(Sender<OTelSdkResult>),
}

impl MetricReader for PeriodicReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        self.inner.register_pipeline(pipeline);
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        self.inner.produce(rm)
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.inner.shutdown()
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        kind.temporality_preference(self.inner.temporality)
    }
}
