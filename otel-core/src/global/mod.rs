//! Process-wide telemetry state.
//!
//! The only global held here is the [`MeterProvider`] used by libraries that
//! do not receive one explicitly. It is initialised lazily to a no-op provider,
//! replaced by applications at startup through [`set_meter_provider`], and can
//! be reset in tests.
//!
//! [`MeterProvider`]: crate::metrics::MeterProvider

mod internal_logging;

#[cfg(feature = "metrics")]
mod metrics;

#[cfg(feature = "metrics")]
pub use metrics::{meter, meter_provider, meter_with_scope, set_meter_provider, GlobalMeterProvider};

#[cfg(all(feature = "metrics", any(test, feature = "testing")))]
pub use metrics::reset_meter_provider;
