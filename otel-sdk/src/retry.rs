//! Retrying wrapper around a network export call.
//!
//! [`RetryingExporter`] calls an export function until it returns a terminal
//! [`ExportResult`], sleeping between attempts with exponential backoff and
//! jitter. A server-advised delay carried by [`RetryableExportError`] is a
//! floor for the sleep. All attempts share one absolute deadline, and a
//! concurrent [`RetryingExporter::shutdown`] interrupts a sleeping retry.
//!
//! ```
//! use otel_sdk::retry::{ExportResult, RetryableExportError, RetryingExporter};
//! use std::time::Duration;
//!
//! let exporter = RetryingExporter::builder(|_deadline, payload: &Vec<u8>| {
//!     if payload.is_empty() {
//!         Err(RetryableExportError::new(None))
//!     } else {
//!         Ok(ExportResult::Success)
//!     }
//! })
//! .with_timeout(Duration::from_secs(5))
//! .build();
//!
//! assert_eq!(
//!     exporter.export_with_retry(Duration::from_secs(1), &vec![1, 2, 3]),
//!     ExportResult::Success
//! );
//! ```
use otel_core::{otel_debug, otel_warn};
use rand::Rng;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Timeout in milliseconds shared by every OTLP signal.
pub const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Timeout in milliseconds for log exports.
pub const OTEL_EXPORTER_OTLP_LOGS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_LOGS_TIMEOUT";
/// Timeout in milliseconds for metric exports.
pub const OTEL_EXPORTER_OTLP_METRICS_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_METRICS_TIMEOUT";
/// Timeout in milliseconds for trace exports.
pub const OTEL_EXPORTER_OTLP_TRACES_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TRACES_TIMEOUT";
/// Default timeout when neither the builder nor the environment sets one.
pub const OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT: Duration = Duration::from_millis(10_000);

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(64);
const MAX_RETRY_AFTER_SECS: u64 = 600;

/// Terminal outcome of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    /// The payload was accepted.
    Success,
    /// The payload was rejected or could not be delivered in time.
    Failure,
}

/// A transient failure. The export function returns it to ask for another
/// attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("retryable export error (retry delay: {retry_delay:?})")]
pub struct RetryableExportError {
    /// Minimum wait the server asked for before the next attempt.
    pub retry_delay: Option<Duration>,
}

impl RetryableExportError {
    /// Creates a retryable error with an optional server-advised delay.
    pub fn new(retry_delay: Option<Duration>) -> Self {
        RetryableExportError { retry_delay }
    }

    /// Classifies an HTTP response status.
    ///
    /// Returns `None` for statuses that must not be retried (4xx other than
    /// 429). A `Retry-After` header given in seconds on a 429 response becomes
    /// the retry delay, capped at ten minutes.
    pub fn from_http_status(status: u16, retry_after: Option<&str>) -> Option<Self> {
        match status {
            429 => Some(RetryableExportError::new(
                retry_after.and_then(parse_retry_after),
            )),
            500..=599 => Some(RetryableExportError::new(None)),
            400..=499 => None,
            _ => Some(RetryableExportError::new(None)),
        }
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    u64::from_str(value.trim())
        .ok()
        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)))
}

/// Exponential backoff starting at one second, doubling up to 64 seconds,
/// each delay scaled by a random factor in `[0.8, 1.2)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    next: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            next: INITIAL_BACKOFF,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let base = self.next;
        self.next = (base * 2).min(MAX_BACKOFF);
        let jitter: f64 = rand::rng().random_range(0.8..1.2);
        Some(base.mul_f64(jitter))
    }
}

type ExportFn<P> =
    Box<dyn Fn(Option<Instant>, &P) -> Result<ExportResult, RetryableExportError> + Send + Sync>;
type BackoffFactory = Box<dyn Fn() -> Box<dyn Iterator<Item = Duration> + Send> + Send + Sync>;

/// The wait before the next attempt: the backoff, but never shorter than
/// what the server asked for.
fn next_delay(backoff: Duration, retry_delay: Option<Duration>) -> Duration {
    match retry_delay {
        Some(server) => backoff.max(server),
        None => backoff,
    }
}

#[derive(Debug, Default)]
struct State {
    in_flight: bool,
    shutdown: bool,
}

/// Configuration for a [`RetryingExporter`].
pub struct RetryingExporterBuilder<P> {
    export_fn: ExportFn<P>,
    timeout: Duration,
    timeout_env_var: Option<&'static str>,
    backoff: BackoffFactory,
}

impl<P> fmt::Debug for RetryingExporterBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExporterBuilder")
            .field("timeout", &self.timeout)
            .field("timeout_env_var", &self.timeout_env_var)
            .finish()
    }
}

impl<P> RetryingExporterBuilder<P> {
    /// Upper bound for a whole export, retries included. Defaults to ten
    /// seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Signal-specific variable consulted before
    /// [`OTEL_EXPORTER_OTLP_TIMEOUT`], such as
    /// [`OTEL_EXPORTER_OTLP_LOGS_TIMEOUT`].
    pub fn with_timeout_env_var(mut self, name: &'static str) -> Self {
        self.timeout_env_var = Some(name);
        self
    }

    /// Replaces the delay sequence. The factory is called once per export;
    /// when its iterator ends, the export gives up.
    pub fn with_backoff<F, I>(mut self, backoff: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = Duration> + Send + 'static,
    {
        self.backoff = Box::new(move || -> Box<dyn Iterator<Item = Duration> + Send> {
            Box::new(backoff())
        });
        self
    }

    /// Builds the exporter. The environment timeout, if set, caps the
    /// configured one.
    pub fn build(self) -> RetryingExporter<P> {
        let env_timeout = self
            .timeout_env_var
            .and_then(timeout_from_env)
            .or_else(|| timeout_from_env(OTEL_EXPORTER_OTLP_TIMEOUT));
        let timeout = match env_timeout {
            Some(env_timeout) => self.timeout.min(env_timeout),
            None => self.timeout,
        };

        RetryingExporter {
            export_fn: self.export_fn,
            timeout,
            backoff: self.backoff,
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }
}

fn remaining(deadline: Option<Instant>) -> Duration {
    deadline.map_or(Duration::MAX, |deadline| {
        deadline.saturating_duration_since(Instant::now())
    })
}

fn timeout_from_env(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|millis| u64::from_str(millis.trim()).ok())
        .map(Duration::from_millis)
}

/// Calls an export function with retries until it succeeds, fails
/// terminally, runs out of time or is shut down.
///
/// Exports are serialized: a second caller waits for the first to finish.
pub struct RetryingExporter<P> {
    export_fn: ExportFn<P>,
    timeout: Duration,
    backoff: BackoffFactory,
    state: Mutex<State>,
    changed: Condvar,
}

impl<P> fmt::Debug for RetryingExporter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExporter")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Clears `in_flight` even when the export function panics.
struct InFlight<'a, P> {
    exporter: &'a RetryingExporter<P>,
}

impl<P> Drop for InFlight<'_, P> {
    fn drop(&mut self) {
        self.exporter.lock_state().in_flight = false;
        self.exporter.changed.notify_all();
    }
}

impl<P> RetryingExporter<P> {
    /// Starts configuring an exporter around `export_fn`.
    ///
    /// `export_fn` receives the absolute deadline of the whole export, `None`
    /// when the budget is too large to represent, and the payload. It returns a terminal [`ExportResult`] or a
    /// [`RetryableExportError`] to request another attempt.
    pub fn builder<F>(export_fn: F) -> RetryingExporterBuilder<P>
    where
        F: Fn(Option<Instant>, &P) -> Result<ExportResult, RetryableExportError>
            + Send
            + Sync
            + 'static,
    {
        RetryingExporterBuilder {
            export_fn: Box::new(export_fn),
            timeout: OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT,
            timeout_env_var: None,
            backoff: Box::new(|| -> Box<dyn Iterator<Item = Duration> + Send> {
                Box::new(ExponentialBackoff::default())
            }),
        }
    }

    /// The effective timeout: the smaller of the configured and environment
    /// values.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exports `payload`, retrying transient failures.
    ///
    /// The deadline is now plus the smaller of `timeout` and
    /// [`RetryingExporter::timeout`]. A budget past the range of [`Instant`]
    /// means no deadline.
    pub fn export_with_retry(&self, timeout: Duration, payload: &P) -> ExportResult {
        let deadline = Instant::now().checked_add(timeout.min(self.timeout));

        let state = self.lock_state();
        let wait = remaining(deadline);
        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, wait, |s| s.in_flight && !s.shutdown)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.shutdown {
            otel_warn!(
                name: "RetryingExporter.ExportAfterShutdown",
                message = "Export attempted after shutdown, payload dropped."
            );
            return ExportResult::Failure;
        }
        if state.in_flight {
            otel_warn!(
                name: "RetryingExporter.DeadlineExceeded",
                message = "Timed out waiting for the previous export to finish."
            );
            return ExportResult::Failure;
        }
        state.in_flight = true;
        drop(state);
        let _in_flight = InFlight { exporter: self };

        let mut backoff = (self.backoff)();
        loop {
            if remaining(deadline).is_zero() {
                otel_warn!(name: "RetryingExporter.DeadlineExceeded");
                return ExportResult::Failure;
            }

            let err = match (self.export_fn)(deadline, payload) {
                Ok(result) => return result,
                Err(err) => err,
            };

            let Some(backoff_delay) = backoff.next() else {
                otel_warn!(
                    name: "RetryingExporter.RetriesExhausted",
                    error = format!("{}", err)
                );
                return ExportResult::Failure;
            };
            let delay = next_delay(backoff_delay, err.retry_delay);
            let left = remaining(deadline);
            if delay > left {
                otel_warn!(
                    name: "RetryingExporter.DeadlineExceeded",
                    delay_ms = delay.as_millis(),
                    remaining_ms = left.as_millis(),
                    error = format!("{}", err)
                );
                return ExportResult::Failure;
            }

            otel_debug!(
                name: "RetryingExporter.Retrying",
                delay_ms = delay.as_millis(),
                error = format!("{}", err)
            );
            let state = self.lock_state();
            let (state, _) = self
                .changed
                .wait_timeout_while(state, delay, |s| !s.shutdown)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.shutdown {
                otel_warn!(
                    name: "RetryingExporter.Cancelled",
                    message = "Export cancelled due to shutdown timing out."
                );
                return ExportResult::Failure;
            }
        }
    }

    /// Waits up to `timeout` for an in-flight export, then marks the exporter
    /// shut down. A retry still sleeping at that point is cancelled.
    pub fn shutdown(&self, timeout: Duration) {
        let state = self.lock_state();
        if state.shutdown {
            otel_warn!(
                name: "RetryingExporter.AlreadyShutdown",
                message = "Shutdown called more than once."
            );
            return;
        }
        let (mut state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.in_flight)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.shutdown = true;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    fn zero_backoff() -> std::iter::Repeat<Duration> {
        std::iter::repeat(Duration::ZERO)
    }

    #[test]
    fn succeeds_after_two_retryable_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(RetryableExportError::new(None)),
                _ => Ok(ExportResult::Success),
            }
        })
        .with_backoff(zero_backoff)
        .build();

        let result = exporter.export_with_retry(Duration::from_secs(10), &());

        assert_eq!(result, ExportResult::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn terminal_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ExportResult::Failure)
        })
        .with_backoff(zero_backoff)
        .build();

        assert_eq!(
            exporter.export_with_retry(Duration::from_secs(10), &()),
            ExportResult::Failure
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case(Duration::ZERO, None, Duration::ZERO)]
    #[case(Duration::ZERO, Some(Duration::from_secs(4)), Duration::from_secs(4))]
    #[case(Duration::from_secs(8), Some(Duration::from_secs(4)), Duration::from_secs(8))]
    #[case(Duration::from_secs(2), None, Duration::from_secs(2))]
    fn server_delay_is_a_floor(
        #[case] backoff: Duration,
        #[case] retry_delay: Option<Duration>,
        #[case] expected: Duration,
    ) {
        assert_eq!(next_delay(backoff, retry_delay), expected);
    }

    #[test]
    fn server_delay_overrides_smaller_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RetryableExportError::new(Some(Duration::from_millis(40))))
            } else {
                Ok(ExportResult::Success)
            }
        })
        .with_backoff(zero_backoff)
        .build();

        let start = Instant::now();
        let result = exporter.export_with_retry(Duration::from_secs(10), &());

        assert_eq!(result, ExportResult::Success);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gives_up_when_delay_passes_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RetryableExportError::new(None))
        })
        .with_backoff(|| std::iter::repeat(Duration::from_secs(10)))
        .build();

        let start = Instant::now();
        let result = exporter.export_with_retry(Duration::from_millis(100), &());

        assert_eq!(result, ExportResult::Failure);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn exhausted_backoff_gives_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RetryableExportError::new(None))
        })
        .with_backoff(|| std::iter::repeat(Duration::ZERO).take(2))
        .build();

        assert_eq!(
            exporter.export_with_retry(Duration::from_secs(10), &()),
            ExportResult::Failure
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn export_after_shutdown_does_not_call_export_fn() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let exporter = RetryingExporter::builder(move |_, _: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ExportResult::Success)
        })
        .build();

        exporter.shutdown(Duration::from_millis(10));
        // second call only warns
        exporter.shutdown(Duration::from_millis(10));

        assert_eq!(
            exporter.export_with_retry(Duration::from_secs(1), &()),
            ExportResult::Failure
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_interrupts_retry_sleep() {
        let (called_tx, called_rx) = mpsc::channel();
        let called_tx = Mutex::new(called_tx);
        let exporter = Arc::new(
            RetryingExporter::builder(move |_, _: &()| {
                let _ = called_tx.lock().unwrap().send(());
                Err(RetryableExportError::new(None))
            })
            .with_timeout(Duration::from_secs(60))
            .with_backoff(|| std::iter::repeat(Duration::from_secs(30)))
            .build(),
        );

        let worker = {
            let exporter = exporter.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = exporter.export_with_retry(Duration::from_secs(60), &());
                (result, start.elapsed())
            })
        };

        called_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        exporter.shutdown(Duration::from_millis(10));

        let (result, elapsed) = worker.join().unwrap();
        assert_eq!(result, ExportResult::Failure);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn shutdown_waits_for_in_flight_export() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (called_tx, called_rx) = mpsc::channel();
        let release_rx = Mutex::new(release_rx);
        let called_tx = Mutex::new(called_tx);
        let exporter = Arc::new(
            RetryingExporter::builder(move |_, _: &()| {
                let _ = called_tx.lock().unwrap().send(());
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(5));
                Ok(ExportResult::Success)
            })
            .build(),
        );

        let worker = {
            let exporter = exporter.clone();
            thread::spawn(move || exporter.export_with_retry(Duration::from_secs(10), &()))
        };
        called_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        exporter.shutdown(Duration::from_secs(5));

        assert_eq!(worker.join().unwrap(), ExportResult::Success);
        releaser.join().unwrap();
    }

    #[test]
    fn smallest_timeout_wins() {
        let budgets = Arc::new(Mutex::new(Vec::new()));
        let seen = budgets.clone();
        let build = move || {
            let seen = seen.clone();
            RetryingExporter::builder(move |deadline: Option<Instant>, _: &()| {
                seen.lock().unwrap().push(remaining(deadline));
                Ok(ExportResult::Success)
            })
            .with_timeout(Duration::from_secs(10))
            .with_timeout_env_var(OTEL_EXPORTER_OTLP_LOGS_TIMEOUT)
            .build()
        };

        temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_TIMEOUT, Some("5000")),
                (OTEL_EXPORTER_OTLP_LOGS_TIMEOUT, None),
            ],
            || {
                let exporter = build();
                assert_eq!(exporter.timeout(), Duration::from_millis(5000));
                exporter.export_with_retry(Duration::from_millis(50), &());
            },
        );

        temp_env::with_vars(
            [
                (OTEL_EXPORTER_OTLP_TIMEOUT, Some("5000")),
                (OTEL_EXPORTER_OTLP_LOGS_TIMEOUT, Some("200")),
            ],
            || {
                let exporter = build();
                assert_eq!(exporter.timeout(), Duration::from_millis(200));
            },
        );

        temp_env::with_vars_unset(
            [OTEL_EXPORTER_OTLP_TIMEOUT, OTEL_EXPORTER_OTLP_LOGS_TIMEOUT],
            || {
                assert_eq!(build().timeout(), Duration::from_secs(10));
            },
        );

        let budgets = budgets.lock().unwrap();
        assert_eq!(budgets.len(), 1);
        assert!(budgets[0] <= Duration::from_millis(50));
    }

    #[test]
    fn unbounded_timeout_exports_without_deadline() {
        let deadlines = Arc::new(Mutex::new(Vec::new()));
        let seen = deadlines.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        temp_env::with_vars_unset([OTEL_EXPORTER_OTLP_TIMEOUT], || {
            let exporter = RetryingExporter::builder(move |deadline: Option<Instant>, _: &()| {
                seen.lock().unwrap().push(deadline);
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(RetryableExportError::new(None)),
                    _ => Ok(ExportResult::Success),
                }
            })
            .with_timeout(Duration::MAX)
            .with_backoff(zero_backoff)
            .build();

            assert_eq!(
                exporter.export_with_retry(Duration::MAX, &()),
                ExportResult::Success
            );
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*deadlines.lock().unwrap(), vec![None, None]);
    }

    #[test]
    fn backoff_doubles_with_jitter_and_caps() {
        let delays: Vec<Duration> = ExponentialBackoff::default().take(9).collect();
        let bases = [1_u64, 2, 4, 8, 16, 32, 64, 64, 64];
        for (delay, base) in delays.iter().zip(bases) {
            let base = Duration::from_secs(base);
            assert!(*delay >= base.mul_f64(0.8), "{delay:?} below {base:?}");
            assert!(*delay < base.mul_f64(1.2), "{delay:?} above {base:?}");
        }
    }

    #[rstest]
    #[case(429, Some("30"), Some(Some(Duration::from_secs(30))))]
    #[case(429, Some("3600"), Some(Some(Duration::from_secs(600))))]
    #[case(429, Some("Fri, 31 Dec 1999 23:59:59 GMT"), Some(None))]
    #[case(429, None, Some(None))]
    #[case(503, None, Some(None))]
    #[case(400, None, None)]
    #[case(404, Some("10"), None)]
    #[case(302, None, Some(None))]
    fn http_status_classification(
        #[case] status: u16,
        #[case] retry_after: Option<&str>,
        #[case] expected: Option<Option<Duration>>,
    ) {
        let classified = RetryableExportError::from_http_status(status, retry_after);
        assert_eq!(classified.map(|err| err.retry_delay), expected);
    }
}
