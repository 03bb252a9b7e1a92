#![allow(unused_macros)]
//! Diagnostics emitted by the SDK about itself.
//!
//! These macros are meant for SDK components, exporters and processors. They
//! are not an application logging facility. Each event carries a `name` in
//! `Component.Event` form plus optional `key = value` attributes; values must
//! implement `Display` and be recordable by `tracing`.
//!
//! With the `internal-logs` feature of the *calling* crate enabled, events
//! are forwarded to `tracing` with the calling crate's name as target. Under
//! `cfg(test)` they are printed to stdout, visible with `--nocapture`.

#[doc(hidden)]
#[macro_export]
macro_rules! __otel_log {
    ($level:ident, $label:literal, name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::$level!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                name = $name
                $(, $key = $value)*
            );
        }

        #[cfg(test)]
        {
            print!("{}: name={}", $label, $name);
            $(
                print!(", {}={}", stringify!($key), $value);
            )*
            println!();
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name $(, $value)*);
        }
    };
}

/// Logs an informational event about the SDK lifecycle.
///
/// # Example:
/// ```rust
/// use otel_core::otel_info;
/// otel_info!(name: "MeterProvider.Built", readers = 2);
/// ```
#[macro_export]
macro_rules! otel_info {
    ($($args:tt)*) => {
        $crate::__otel_log!(info, "otel_info", $($args)*)
    };
}

/// Logs a warning: something was dropped, skipped or misconfigured but the
/// SDK keeps running.
///
/// # Example:
/// ```rust
/// use otel_core::otel_warn;
/// otel_warn!(name: "BatchProcessor.QueueFull", max_queue_size = 2048);
/// ```
#[macro_export]
macro_rules! otel_warn {
    ($($args:tt)*) => {
        $crate::__otel_log!(warn, "otel_warn", $($args)*)
    };
}

/// Logs a debug event, useful when troubleshooting the SDK itself.
///
/// # Example:
/// ```rust
/// use otel_core::otel_debug;
/// otel_debug!(name: "BatchProcessor.ExportingDueToTimer");
/// ```
#[macro_export]
macro_rules! otel_debug {
    ($($args:tt)*) => {
        $crate::__otel_log!(debug, "otel_debug", $($args)*)
    };
}

/// Logs an error: an operation failed and data was likely lost.
///
/// # Example:
/// ```rust
/// use otel_core::otel_error;
/// otel_error!(name: "BatchProcessor.ExportError", error = "connection refused");
/// ```
#[macro_export]
macro_rules! otel_error {
    ($($args:tt)*) => {
        $crate::__otel_log!(error, "otel_error", $($args)*)
    };
}
