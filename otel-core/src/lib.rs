//! API types shared by the telemetry SDK.
//!
//! This crate holds the pieces instrumented code touches directly: attribute
//! key/values, instrumentation scopes, the metrics instrument API, trace
//! identifiers with their `TraceState`, and a minimal [`Context`] carrying the
//! parent span. The SDK crate (`otel_sdk`) implements aggregation, export and
//! sampling on top of these types.
//!
//! # Internal logging
//!
//! The `otel_debug!`, `otel_info!`, `otel_warn!` and `otel_error!` macros
//! report diagnostics of the SDK itself. With the `internal-logs` feature they
//! are forwarded to [`tracing`](https://crates.io/crates/tracing).
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

pub mod global;

#[cfg(feature = "trace")]
mod context;

#[cfg(feature = "trace")]
pub use context::Context;

mod common;

pub use common::{
    InstrumentationScope, InstrumentationScopeBuilder, Key, KeyValue, StringValue, Value,
};

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "trace")]
pub mod trace;

#[cfg(feature = "trace")]
pub use trace::{SpanId, TraceFlags, TraceId};

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
