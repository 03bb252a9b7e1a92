use crate::metrics::{noop::NoopMeterProvider, Meter, MeterProvider};
use crate::{otel_error, otel_info, InstrumentationScope};
use std::sync::{Arc, OnceLock, RwLock};

/// Shared handle to the installed provider.
pub type GlobalMeterProvider = Arc<dyn MeterProvider + Send + Sync>;

static GLOBAL_METER_PROVIDER: OnceLock<RwLock<GlobalMeterProvider>> = OnceLock::new();

fn slot() -> &'static RwLock<GlobalMeterProvider> {
    GLOBAL_METER_PROVIDER.get_or_init(|| RwLock::new(Arc::new(NoopMeterProvider::new())))
}

/// Installs `new_provider` as the process-wide meter provider.
///
/// Meters obtained before this call keep pointing at the provider that was
/// current when they were created. Applications should call this once at
/// startup; libraries should not call it at all.
pub fn set_meter_provider<P>(new_provider: P)
where
    P: MeterProvider + Send + Sync + 'static,
{
    match slot().write() {
        Ok(mut provider) => {
            *provider = Arc::new(new_provider);
            otel_info!(name: "MeterProvider.GlobalSet");
        }
        Err(_) => {
            otel_error!(
                name: "MeterProvider.GlobalSetFailed",
                message = "global meter provider lock is poisoned"
            );
        }
    }
}

/// Returns the currently installed meter provider, or a no-op provider.
pub fn meter_provider() -> GlobalMeterProvider {
    match slot().read() {
        Ok(provider) => provider.clone(),
        Err(_) => {
            otel_error!(
                name: "MeterProvider.GlobalGetFailed",
                message = "global meter provider lock is poisoned"
            );
            Arc::new(NoopMeterProvider::new())
        }
    }
}

/// Shorthand for `meter_provider().meter(name)`.
pub fn meter(name: &'static str) -> Meter {
    meter_provider().meter(name)
}

/// Shorthand for `meter_provider().meter_with_scope(scope)`.
pub fn meter_with_scope(scope: InstrumentationScope) -> Meter {
    meter_provider().meter_with_scope(scope)
}

/// Puts the no-op provider back. Only meant for tests that install their
/// own provider and need isolation from each other.
#[cfg(any(test, feature = "testing"))]
pub fn reset_meter_provider() {
    if let Ok(mut provider) = slot().write() {
        *provider = Arc::new(NoopMeterProvider::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InstrumentProvider, Meter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingProvider {
        meters_created: Arc<AtomicUsize>,
    }

    #[derive(Debug)]
    struct EmptyInstruments;
    impl InstrumentProvider for EmptyInstruments {}

    impl MeterProvider for CountingProvider {
        fn meter_with_scope(&self, _scope: InstrumentationScope) -> Meter {
            self.meters_created.fetch_add(1, Ordering::SeqCst);
            Meter::new(Arc::new(EmptyInstruments))
        }
    }

    #[test]
    fn install_use_and_reset_global_provider() {
        let counter = Arc::new(AtomicUsize::new(0));
        set_meter_provider(CountingProvider {
            meters_created: counter.clone(),
        });

        let _meter = meter("test");
        let _scoped = meter_with_scope(InstrumentationScope::builder("scoped").build());
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        reset_meter_provider();
        let _meter = meter("after-reset");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
