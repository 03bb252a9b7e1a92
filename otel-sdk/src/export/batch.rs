//! A bounded, lossy queue drained in batches by a dedicated worker thread.
//!
//! ```text
//!   emit(record) ──► VecDeque (max_queue_size, oldest dropped first)
//!                          │
//!        wake when len >= max_export_batch_size, or every scheduled_delay
//!                          ▼
//!                   worker thread ──► BatchExporter::export(Vec<T>)
//! ```
//!
//! The worker and [`BatchProcessor::force_flush`] share one export lock so a
//! record is handed to the exporter exactly once.
use crate::error::{OTelSdkError, OTelSdkResult};
use arc_swap::ArcSwap;
use otel_core::{otel_debug, otel_error, otel_warn};
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::process;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Delay interval between two consecutive exports.
pub(crate) const OTEL_BLRP_SCHEDULE_DELAY: &str = "OTEL_BLRP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive exports.
pub(crate) const OTEL_BLRP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum allowed time to export data.
pub(crate) const OTEL_BLRP_EXPORT_TIMEOUT: &str = "OTEL_BLRP_EXPORT_TIMEOUT";
/// Default maximum allowed time to export data.
pub(crate) const OTEL_BLRP_EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(30_000);
/// Maximum queue size.
pub(crate) const OTEL_BLRP_MAX_QUEUE_SIZE: &str = "OTEL_BLRP_MAX_QUEUE_SIZE";
/// Default maximum queue size.
pub(crate) const OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum batch size, must be less than or equal to OTEL_BLRP_MAX_QUEUE_SIZE.
pub(crate) const OTEL_BLRP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BLRP_MAX_EXPORT_BATCH_SIZE";
/// Default maximum batch size.
pub(crate) const OTEL_BLRP_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const SHUT_DOWN: u8 = 2;

/// The sink a [`BatchProcessor`] drains its queue into.
///
/// Implementations are called from the worker thread and, during
/// [`BatchProcessor::force_flush`], from the flushing thread. Calls never
/// overlap.
pub trait BatchExporter<T>: Send + Sync + 'static {
    /// Exports one batch. Errors are logged by the processor and the batch is
    /// discarded.
    fn export(&self, batch: Vec<T>) -> OTelSdkResult;

    /// Flushes data buffered by the exporter itself.
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    /// Releases exporter resources. Called once, after the final drain.
    fn shutdown(&self, timeout: Duration) -> OTelSdkResult {
        let _ = timeout;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportStrategy {
    /// Export full batches only; leftovers wait for the timer.
    WhileBatchExceedsThreshold,
    /// Export one batch, even a partial one, then any further full batches.
    AtLeastOneBatch,
    /// Drain the queue.
    All,
}

struct Queue<T> {
    records: VecDeque<T>,
    export_requested: bool,
}

/// State shared with one worker thread. Replaced wholesale after a fork.
struct Shared<T> {
    queue: Mutex<Queue<T>>,
    wakeup: Condvar,
    export_lock: Mutex<()>,
    state: AtomicU8,
    dropped: AtomicUsize,
    pid: u32,
}

impl<T: Send + 'static> Shared<T> {
    fn new(capacity: usize) -> Self {
        Shared {
            queue: Mutex::new(Queue {
                records: VecDeque::with_capacity(capacity),
                export_requested: false,
            }),
            wakeup: Condvar::new(),
            export_lock: Mutex::new(()),
            state: AtomicU8::new(RUNNING),
            dropped: AtomicUsize::new(0),
            pid: process::id(),
        }
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn export(
        &self,
        exporter: &dyn BatchExporter<T>,
        max_batch_size: usize,
        strategy: ExportStrategy,
    ) -> OTelSdkResult {
        let _export_guard = self.export_lock.lock()?;
        let mut exported_batches = 0_usize;
        let mut result = Ok(());

        loop {
            let batch: Vec<T> = {
                let mut queue = self.queue.lock()?;
                let len = queue.records.len();
                let proceed = len > 0
                    && match strategy {
                        ExportStrategy::WhileBatchExceedsThreshold => len >= max_batch_size,
                        ExportStrategy::AtLeastOneBatch => {
                            exported_batches == 0 || len >= max_batch_size
                        }
                        ExportStrategy::All => true,
                    };
                if !proceed {
                    break;
                }
                let count = len.min(max_batch_size);
                queue.records.drain(..count).collect()
            };

            exported_batches += 1;
            if let Err(err) = exporter.export(batch) {
                otel_error!(
                    name: "BatchProcessor.ExportError",
                    error = format!("{}", err)
                );
                result = Err(err);
            }
        }

        result
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Buffers records and exports them in batches from a background thread.
///
/// * Pushing onto a full queue drops the oldest record. The first drop is
///   logged as a warning and the total is logged at shutdown.
/// * The worker wakes when a full batch is queued, and otherwise every
///   `scheduled_delay`.
/// * Shutdown drains the queue before shutting the exporter down.
/// * When the process id changes (the process forked), the queue is
///   cleared and a fresh worker is started on the next call.
pub struct BatchProcessor<T: Send + 'static> {
    shared: ArcSwap<Shared<T>>,
    worker: Mutex<Option<Worker>>,
    exporter: Arc<dyn BatchExporter<T>>,
    config: BatchConfig,
    signal: &'static str,
}

impl<T: Send + 'static> fmt::Debug for BatchProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("signal", &self.signal)
            .field("config", &self.config)
            .finish()
    }
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// Starts a processor and its worker thread.
    ///
    /// `signal` names the worker thread, `OpenTelemetry.<signal>.BatchProcessor`.
    pub fn new(
        exporter: Arc<dyn BatchExporter<T>>,
        config: BatchConfig,
        signal: &'static str,
    ) -> Result<Self, OTelSdkError> {
        let shared = Arc::new(Shared::new(config.max_queue_size));
        let worker = spawn_worker(shared.clone(), exporter.clone(), config.clone(), signal)?;
        Ok(BatchProcessor {
            shared: ArcSwap::new(shared),
            worker: Mutex::new(Some(worker)),
            exporter,
            config,
            signal,
        })
    }

    /// Queues a record for export.
    pub fn emit(&self, record: T) {
        if self.shared.load().pid != process::id() {
            if let Err(err) = self.reinit_if_forked() {
                otel_error!(
                    name: "BatchProcessor.ReinitFailed",
                    signal = self.signal,
                    error = format!("{}", err)
                );
                return;
            }
        }

        let shared = self.shared.load();
        if !shared.is_running() {
            otel_warn!(
                name: "BatchProcessor.EmitAfterShutdown",
                signal = self.signal,
                message = "Record dropped: the processor is shut down."
            );
            return;
        }

        let Ok(mut queue) = shared.queue.lock() else {
            return;
        };
        if queue.records.len() >= self.config.max_queue_size {
            queue.records.pop_front();
            if shared.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                otel_warn!(
                    name: "BatchProcessor.QueueFull",
                    signal = self.signal,
                    max_queue_size = self.config.max_queue_size,
                    message = "Queue is full, dropping the oldest records. The total count is logged at shutdown."
                );
            }
        }
        queue.records.push_back(record);

        if queue.records.len() >= self.config.max_export_batch_size && !queue.export_requested {
            queue.export_requested = true;
            shared.wakeup.notify_one();
        }
    }

    /// Exports everything queued on the calling thread, then flushes the
    /// exporter.
    pub fn force_flush(&self) -> OTelSdkResult {
        if self.shared.load().pid != process::id() {
            self.reinit_if_forked()?;
        }
        let shared = self.shared.load_full();
        if !shared.is_running() {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        shared.export(
            self.exporter.as_ref(),
            self.config.max_export_batch_size,
            ExportStrategy::All,
        )?;
        self.exporter.force_flush()
    }

    /// Shuts down with the configured `max_export_timeout`.
    pub fn shutdown(&self) -> OTelSdkResult {
        self.shutdown_with_timeout(self.config.max_export_timeout)
    }

    /// Stops accepting records, drains the queue on the worker and shuts the
    /// exporter down.
    ///
    /// Waiting for the worker is bounded by `timeout`. A second call returns
    /// [`OTelSdkError::AlreadyShutdown`].
    pub fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        let shared = self.shared.load_full();
        if shared
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            otel_warn!(
                name: "BatchProcessor.AlreadyShutdown",
                signal = self.signal,
                message = "Shutdown called more than once."
            );
            return Err(OTelSdkError::AlreadyShutdown);
        }

        let dropped = shared.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            otel_warn!(
                name: "BatchProcessor.RecordsDropped",
                signal = self.signal,
                dropped_count = dropped,
                max_queue_size = self.config.max_queue_size,
                message = "Records were dropped because the queue was full. Consider increasing the queue size or the export rate."
            );
        }

        {
            let _queue = shared.queue.lock()?;
            shared.wakeup.notify_all();
        }

        let worker = self.worker.lock()?.take();
        if let Some(worker) = worker {
            match worker.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        otel_error!(name: "BatchProcessor.WorkerPanicked", signal = self.signal);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    otel_error!(
                        name: "BatchProcessor.ShutdownTimeout",
                        signal = self.signal,
                        timeout_ms = timeout.as_millis()
                    );
                    return Err(OTelSdkError::Timeout(timeout));
                }
            }
        }

        let result = self.exporter.shutdown(timeout);
        shared.state.store(SHUT_DOWN, Ordering::Release);
        result
    }

    /// Discards queued records and starts a fresh worker.
    ///
    /// A forked child inherits the queue but not the worker thread. This is
    /// called automatically when the process id changes and may also be
    /// called from an `atfork` child handler.
    pub fn reinit_after_fork(&self) -> OTelSdkResult {
        let mut slot = lock_ignoring_poison(&self.worker);
        self.reinit_locked(&mut slot)
    }

    fn reinit_if_forked(&self) -> OTelSdkResult {
        let mut slot = lock_ignoring_poison(&self.worker);
        // another thread may have re-initialised while we waited
        if self.shared.load().pid == process::id() {
            return Ok(());
        }
        self.reinit_locked(&mut slot)
    }

    fn reinit_locked(&self, slot: &mut Option<Worker>) -> OTelSdkResult {
        let old = self.shared.load_full();
        // locks held by threads that did not survive a fork stay held forever
        if let Ok(mut queue) = old.queue.try_lock() {
            queue.records.clear();
            old.state.store(SHUT_DOWN, Ordering::Release);
            old.wakeup.notify_all();
        } else {
            old.state.store(SHUT_DOWN, Ordering::Release);
        }

        let shared = Arc::new(Shared::new(self.config.max_queue_size));
        let worker = spawn_worker(
            shared.clone(),
            self.exporter.clone(),
            self.config.clone(),
            self.signal,
        )?;
        self.shared.store(shared);
        // the previous worker, if still alive, exits on its own
        *slot = Some(worker);

        otel_debug!(
            name: "BatchProcessor.Reinitialized",
            signal = self.signal,
            pid = process::id()
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.shared
            .load()
            .queue
            .lock()
            .map(|q| q.records.len())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn dropped_count(&self) -> usize {
        self.shared.load().dropped.load(Ordering::Relaxed)
    }
}

impl<T: Send + 'static> Drop for BatchProcessor<T> {
    fn drop(&mut self) {
        if self.shared.load().is_running() {
            let _ = self.shutdown();
        }
    }
}

fn lock_ignoring_poison<U>(mutex: &Mutex<U>) -> MutexGuard<'_, U> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_worker<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    exporter: Arc<dyn BatchExporter<T>>,
    config: BatchConfig,
    signal: &'static str,
) -> Result<Worker, OTelSdkError> {
    let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);

    let handle = thread::Builder::new()
        .name(format!("OpenTelemetry.{}.BatchProcessor", signal))
        .spawn(move || {
            otel_debug!(
                name: "BatchProcessor.ThreadStarted",
                signal = signal,
                interval_in_millisecs = config.scheduled_delay.as_millis(),
                max_export_batch_size = config.max_export_batch_size,
                max_queue_size = config.max_queue_size
            );

            loop {
                let requested = {
                    let Ok(queue) = shared.queue.lock() else {
                        break;
                    };
                    let Ok((mut queue, _)) = shared.wakeup.wait_timeout_while(
                        queue,
                        config.scheduled_delay,
                        |q| !q.export_requested && shared.is_running(),
                    ) else {
                        break;
                    };
                    std::mem::take(&mut queue.export_requested)
                };

                if !shared.is_running() {
                    break;
                }

                let strategy = if requested {
                    otel_debug!(name: "BatchProcessor.ExportingDueToBatchSize", signal = signal);
                    ExportStrategy::WhileBatchExceedsThreshold
                } else {
                    otel_debug!(name: "BatchProcessor.ExportingDueToTimer", signal = signal);
                    ExportStrategy::AtLeastOneBatch
                };
                let _ = shared.export(exporter.as_ref(), config.max_export_batch_size, strategy);
            }

            let _ = shared.export(
                exporter.as_ref(),
                config.max_export_batch_size,
                ExportStrategy::All,
            );
            let _ = done_tx.send(());
            otel_debug!(name: "BatchProcessor.ThreadStopped", signal = signal);
        })
        .map_err(|err| {
            OTelSdkError::InternalFailure(format!("failed to spawn batch worker thread: {}", err))
        })?;

    Ok(Worker {
        handle,
        done: done_rx,
    })
}

/// Errors returned when building an invalid [`BatchConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BatchConfigError {
    /// `max_queue_size` was zero.
    #[error("max_queue_size must be greater than zero")]
    ZeroQueueSize,
    /// `max_export_batch_size` was zero.
    #[error("max_export_batch_size must be greater than zero")]
    ZeroExportBatchSize,
    /// The batch could never fill up.
    #[error("max_export_batch_size ({batch_size}) must not exceed max_queue_size ({queue_size})")]
    BatchSizeExceedsQueueSize {
        /// Configured batch size.
        batch_size: usize,
        /// Configured queue size.
        queue_size: usize,
    },
    /// `scheduled_delay` was zero.
    #[error("scheduled_delay must be greater than zero")]
    ZeroScheduledDelay,
}

/// Batch processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance of [`BatchConfig`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// The maximum queue size to buffer records for delayed processing. If the
    /// queue gets full it drops the oldest records. The default value is 2048.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive processing of batches. The
    /// default value is 5 seconds.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of records to process in a single batch. If there
    /// are more than one batch worth of records then it processes multiple
    /// batches without waiting. The default value is 512.
    pub(crate) max_export_batch_size: usize,

    /// The maximum duration to wait for the worker during shutdown. The
    /// default value is 30 seconds.
    pub(crate) max_export_timeout: Duration,
}

impl Default for BatchConfig {
    /// Configuration from the `OTEL_BLRP_*` environment variables. Invalid
    /// combinations fall back to the built-in defaults.
    fn default() -> Self {
        BatchConfigBuilder::default().build().unwrap_or_else(|err| {
            otel_warn!(
                name: "BatchConfig.InvalidEnvironment",
                error = format!("{}", err),
                message = "Falling back to the default batch configuration."
            );
            BatchConfig::builtin()
        })
    }
}

impl BatchConfig {
    fn builtin() -> Self {
        BatchConfig {
            max_queue_size: OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: OTEL_BLRP_SCHEDULE_DELAY_DEFAULT,
            max_export_batch_size: OTEL_BLRP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: OTEL_BLRP_EXPORT_TIMEOUT_DEFAULT,
        }
    }

    /// The maximum number of buffered records.
    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    /// The delay between two timer-driven exports.
    pub fn scheduled_delay(&self) -> Duration {
        self.scheduled_delay
    }

    /// The maximum number of records per export call.
    pub fn max_export_batch_size(&self) -> usize {
        self.max_export_batch_size
    }

    /// The bound on waiting for the worker at shutdown.
    pub fn max_export_timeout(&self) -> Duration {
        self.max_export_timeout
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with default batch config values as per the specs.
    /// The values are overriden by environment variables if set.
    /// The supported environment variables are:
    /// * `OTEL_BLRP_MAX_QUEUE_SIZE`
    /// * `OTEL_BLRP_SCHEDULE_DELAY`
    /// * `OTEL_BLRP_MAX_EXPORT_BATCH_SIZE`
    /// * `OTEL_BLRP_EXPORT_TIMEOUT`
    fn default() -> Self {
        BatchConfigBuilder::new().init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// A builder holding the built-in defaults, ignoring the environment.
    pub fn new() -> Self {
        BatchConfigBuilder {
            max_queue_size: OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: OTEL_BLRP_SCHEDULE_DELAY_DEFAULT,
            max_export_batch_size: OTEL_BLRP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: OTEL_BLRP_EXPORT_TIMEOUT_DEFAULT,
        }
    }

    /// Set max_queue_size for [`BatchConfigBuilder`].
    /// It's the maximum queue size to buffer records for delayed processing.
    /// If the queue gets full it will drop the oldest records.
    /// The default value of is 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set scheduled_delay for [`BatchConfigBuilder`].
    /// It's the delay interval in milliseconds between two consecutive processing of batches.
    /// The default value is 5000 milliseconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set max_export_timeout for [`BatchConfigBuilder`].
    /// It bounds how long shutdown waits for the final drain.
    /// The default value is 30000 milliseconds.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Set max_export_batch_size for [`BatchConfigBuilder`].
    /// It's the maximum number of records to process in a single batch.
    /// It must not exceed `max_queue_size`.
    /// The default value is 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Builds a [`BatchConfig`], rejecting sizes that could never export.
    pub fn build(self) -> Result<BatchConfig, BatchConfigError> {
        if self.max_queue_size == 0 {
            return Err(BatchConfigError::ZeroQueueSize);
        }
        if self.max_export_batch_size == 0 {
            return Err(BatchConfigError::ZeroExportBatchSize);
        }
        if self.max_export_batch_size > self.max_queue_size {
            return Err(BatchConfigError::BatchSizeExceedsQueueSize {
                batch_size: self.max_export_batch_size,
                queue_size: self.max_queue_size,
            });
        }
        if self.scheduled_delay.is_zero() {
            return Err(BatchConfigError::ZeroScheduledDelay);
        }

        Ok(BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size: self.max_export_batch_size,
            max_export_timeout: self.max_export_timeout,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env::var(OTEL_BLRP_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(max_export_batch_size) = env::var(OTEL_BLRP_MAX_EXPORT_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        if let Some(scheduled_delay) = env::var(OTEL_BLRP_SCHEDULE_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_timeout) = env::var(OTEL_BLRP_EXPORT_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            self.max_export_timeout = Duration::from_millis(max_export_timeout);
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingExporter {
        batches: Mutex<Vec<Vec<u32>>>,
        fail: bool,
        shutdown_calls: AtomicUsize,
        // when set, each export blocks until a message arrives
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        started: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl RecordingExporter {
        fn exported(&self) -> Vec<u32> {
            self.batches.lock().unwrap().iter().flatten().copied().collect()
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    impl BatchExporter<u32> for RecordingExporter {
        fn export(&self, batch: Vec<u32>) -> OTelSdkResult {
            if let Some(started) = self.started.lock().unwrap().as_ref() {
                let _ = started.send(());
            }
            if let Some(gate) = self.gate.lock().unwrap().as_ref() {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            self.batches.lock().unwrap().push(batch);
            if self.fail {
                Err(OTelSdkError::InternalFailure("collector unavailable".into()))
            } else {
                Ok(())
            }
        }

        fn shutdown(&self, _timeout: Duration) -> OTelSdkResult {
            self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(queue: usize, batch: usize, delay: Duration) -> BatchConfig {
        BatchConfigBuilder::new()
            .with_max_queue_size(queue)
            .with_max_export_batch_size(batch)
            .with_scheduled_delay(delay)
            .build()
            .unwrap()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_default_batch_config_values() {
        let env_vars = vec![
            OTEL_BLRP_SCHEDULE_DELAY,
            OTEL_BLRP_EXPORT_TIMEOUT,
            OTEL_BLRP_MAX_QUEUE_SIZE,
            OTEL_BLRP_MAX_EXPORT_BATCH_SIZE,
        ];

        let config = temp_env::with_vars_unset(env_vars, BatchConfig::default);

        assert_eq!(config.scheduled_delay, OTEL_BLRP_SCHEDULE_DELAY_DEFAULT);
        assert_eq!(config.max_export_timeout, OTEL_BLRP_EXPORT_TIMEOUT_DEFAULT);
        assert_eq!(config.max_queue_size, OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT);
        assert_eq!(
            config.max_export_batch_size,
            OTEL_BLRP_MAX_EXPORT_BATCH_SIZE_DEFAULT
        );
    }

    #[test]
    fn test_batch_config_configurable_by_env_vars() {
        let env_vars = vec![
            (OTEL_BLRP_SCHEDULE_DELAY, Some("2000")),
            (OTEL_BLRP_EXPORT_TIMEOUT, Some("60000")),
            (OTEL_BLRP_MAX_QUEUE_SIZE, Some("4096")),
            (OTEL_BLRP_MAX_EXPORT_BATCH_SIZE, Some("1024")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.scheduled_delay, Duration::from_millis(2000));
        assert_eq!(config.max_export_timeout, Duration::from_millis(60000));
        assert_eq!(config.max_queue_size, 4096);
        assert_eq!(config.max_export_batch_size, 1024);
    }

    #[test]
    fn test_unparsable_env_vars_are_ignored() {
        let env_vars = vec![
            (OTEL_BLRP_MAX_QUEUE_SIZE, Some("lots")),
            (OTEL_BLRP_SCHEDULE_DELAY, Some("-1")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.max_queue_size, OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT);
        assert_eq!(config.scheduled_delay, OTEL_BLRP_SCHEDULE_DELAY_DEFAULT);
    }

    #[test]
    fn test_invalid_env_combination_falls_back_to_defaults() {
        let env_vars = vec![
            (OTEL_BLRP_MAX_QUEUE_SIZE, Some("64")),
            (OTEL_BLRP_MAX_EXPORT_BATCH_SIZE, Some("128")),
        ];

        let config = temp_env::with_vars(env_vars, BatchConfig::default);

        assert_eq!(config.max_queue_size, OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT);
        assert_eq!(
            config.max_export_batch_size,
            OTEL_BLRP_MAX_EXPORT_BATCH_SIZE_DEFAULT
        );
    }

    #[test]
    fn test_code_based_config_overrides_env_vars() {
        let env_vars = vec![
            (OTEL_BLRP_EXPORT_TIMEOUT, Some("60000")),
            (OTEL_BLRP_MAX_QUEUE_SIZE, Some("4096")),
            (OTEL_BLRP_SCHEDULE_DELAY, Some("2000")),
            (OTEL_BLRP_MAX_EXPORT_BATCH_SIZE, Some("512")),
        ];

        temp_env::with_vars(env_vars, || {
            let config = BatchConfigBuilder::default()
                .with_max_export_batch_size(1)
                .with_scheduled_delay(Duration::from_millis(2))
                .with_max_export_timeout(Duration::from_millis(3))
                .build()
                .unwrap();

            assert_eq!(config.max_export_batch_size, 1);
            assert_eq!(config.scheduled_delay, Duration::from_millis(2));
            assert_eq!(config.max_export_timeout, Duration::from_millis(3));
            assert_eq!(config.max_queue_size, 4096);
        });
    }

    #[test]
    fn test_builder_new_ignores_env_vars() {
        temp_env::with_var(OTEL_BLRP_MAX_QUEUE_SIZE, Some("7"), || {
            let config = BatchConfigBuilder::new().build().unwrap();
            assert_eq!(config.max_queue_size(), OTEL_BLRP_MAX_QUEUE_SIZE_DEFAULT);
        });
    }

    #[rstest]
    #[case(0, 1, 10, BatchConfigError::ZeroQueueSize)]
    #[case(10, 0, 10, BatchConfigError::ZeroExportBatchSize)]
    #[case(4, 8, 10, BatchConfigError::BatchSizeExceedsQueueSize { batch_size: 8, queue_size: 4 })]
    #[case(10, 5, 0, BatchConfigError::ZeroScheduledDelay)]
    fn test_invalid_config_is_rejected(
        #[case] queue: usize,
        #[case] batch: usize,
        #[case] delay_ms: u64,
        #[case] expected: BatchConfigError,
    ) {
        let result = BatchConfigBuilder::new()
            .with_max_queue_size(queue)
            .with_max_export_batch_size(batch)
            .with_scheduled_delay(Duration::from_millis(delay_ms))
            .build();
        assert_eq!(result.unwrap_err(), expected);
    }

    #[test]
    fn full_batch_is_exported_without_waiting_for_the_timer() {
        let exporter = Arc::new(RecordingExporter::default());
        let processor =
            BatchProcessor::new(exporter.clone(), config(10, 5, Duration::from_secs(60)), "Test")
                .unwrap();

        for i in 0..5 {
            processor.emit(i);
        }

        assert!(wait_until(|| exporter.exported().len() == 5));
        assert_eq!(exporter.batch_sizes(), vec![5]);
        processor.shutdown().unwrap();
    }

    #[test]
    fn partial_batch_is_exported_on_timer() {
        let exporter = Arc::new(RecordingExporter::default());
        let processor = BatchProcessor::new(
            exporter.clone(),
            config(10, 5, Duration::from_millis(20)),
            "Test",
        )
        .unwrap();

        processor.emit(1);
        processor.emit(2);

        assert!(wait_until(|| exporter.exported() == vec![1, 2]));
        processor.shutdown().unwrap();
    }

    #[test]
    fn full_queue_drops_oldest_records() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let exporter = Arc::new(RecordingExporter {
            gate: Mutex::new(Some(gate_rx)),
            started: Mutex::new(Some(started_tx)),
            ..Default::default()
        });
        let processor =
            BatchProcessor::new(exporter.clone(), config(3, 1, Duration::from_secs(60)), "Test")
                .unwrap();

        // the worker picks up the first record and blocks inside the exporter
        processor.emit(0);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for i in 1..=5 {
            processor.emit(i);
        }
        assert_eq!(processor.queue_len(), 3);
        assert_eq!(processor.dropped_count(), 2);

        drop(started_rx);
        for _ in 0..4 {
            let _ = gate_tx.send(());
        }
        processor.shutdown().unwrap();

        assert_eq!(exporter.exported(), vec![0, 3, 4, 5]);
    }

    #[rstest]
    #[case(ExportStrategy::WhileBatchExceedsThreshold, vec![3, 3], 1)]
    #[case(ExportStrategy::AtLeastOneBatch, vec![3, 3], 1)]
    #[case(ExportStrategy::All, vec![3, 3, 1], 0)]
    fn export_strategy_batches(
        #[case] strategy: ExportStrategy,
        #[case] expected_batches: Vec<usize>,
        #[case] left_over: usize,
    ) {
        let exporter = RecordingExporter::default();
        let shared = Shared::new(10);
        shared.queue.lock().unwrap().records.extend(0..7);

        shared.export(&exporter, 3, strategy).unwrap();

        assert_eq!(exporter.batch_sizes(), expected_batches);
        assert_eq!(shared.queue.lock().unwrap().records.len(), left_over);
    }

    #[test]
    fn timer_export_sends_partial_batch() {
        let exporter = RecordingExporter::default();
        let shared = Shared::new(10);
        shared.queue.lock().unwrap().records.extend(0..2);

        shared
            .export(&exporter, 3, ExportStrategy::AtLeastOneBatch)
            .unwrap();

        assert_eq!(exporter.batch_sizes(), vec![2]);
    }

    #[test]
    fn shutdown_drains_queue_and_is_not_repeatable() {
        let exporter = Arc::new(RecordingExporter::default());
        let processor = BatchProcessor::new(
            exporter.clone(),
            config(100, 10, Duration::from_secs(60)),
            "Test",
        )
        .unwrap();

        for i in 0..25 {
            processor.emit(i);
        }
        processor.shutdown().unwrap();

        assert_eq!(exporter.exported(), (0..25).collect::<Vec<_>>());
        assert_eq!(exporter.shutdown_calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            processor.shutdown(),
            Err(OTelSdkError::AlreadyShutdown)
        ));
        assert_eq!(exporter.shutdown_calls.load(Ordering::SeqCst), 1);

        processor.emit(99);
        assert_eq!(exporter.exported().len(), 25);
        assert!(matches!(
            processor.force_flush(),
            Err(OTelSdkError::AlreadyShutdown)
        ));
    }

    #[test]
    fn force_flush_exports_everything_in_batches() {
        let exporter = Arc::new(RecordingExporter::default());
        let processor = BatchProcessor::new(
            exporter.clone(),
            config(100, 4, Duration::from_secs(60)),
            "Test",
        )
        .unwrap();

        for i in 0..3 {
            processor.emit(i);
        }
        processor.force_flush().unwrap();
        assert_eq!(exporter.exported(), vec![0, 1, 2]);
        assert_eq!(processor.queue_len(), 0);
        processor.shutdown().unwrap();
    }

    #[test]
    fn export_errors_do_not_stop_the_worker() {
        let exporter = Arc::new(RecordingExporter {
            fail: true,
            ..Default::default()
        });
        let processor =
            BatchProcessor::new(exporter.clone(), config(10, 2, Duration::from_secs(60)), "Test")
                .unwrap();

        processor.emit(1);
        processor.emit(2);
        assert!(wait_until(|| exporter.batch_sizes().len() == 1));

        processor.emit(3);
        processor.emit(4);
        assert!(wait_until(|| exporter.batch_sizes().len() == 2));

        assert!(processor.force_flush().is_ok());
        processor.shutdown().unwrap();
        assert_eq!(exporter.exported(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn shutdown_times_out_when_worker_is_stuck() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::channel();
        let exporter = Arc::new(RecordingExporter {
            gate: Mutex::new(Some(gate_rx)),
            started: Mutex::new(Some(started_tx)),
            ..Default::default()
        });
        let processor =
            BatchProcessor::new(exporter.clone(), config(10, 1, Duration::from_secs(60)), "Test")
                .unwrap();

        processor.emit(1);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let result = processor.shutdown_with_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(OTelSdkError::Timeout(_))));
        let _ = gate_tx.send(());
    }

    #[test]
    fn reinit_after_fork_clears_queue_and_restarts_worker() {
        let exporter = Arc::new(RecordingExporter::default());
        let processor = BatchProcessor::new(
            exporter.clone(),
            config(100, 50, Duration::from_secs(60)),
            "Test",
        )
        .unwrap();

        processor.emit(1);
        processor.emit(2);
        assert_eq!(processor.queue_len(), 2);

        processor.reinit_after_fork().unwrap();
        assert_eq!(processor.queue_len(), 0);

        processor.emit(3);
        processor.shutdown().unwrap();
        assert_eq!(exporter.exported(), vec![3]);
    }
}
