//! Log exporters
use crate::error::OTelSdkResult;
use crate::logs::SdkLogRecord;
use crate::Resource;
use otel_core::InstrumentationScope;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Records handed to a [`LogExporter`] in one call, each paired with the
/// scope of the logger that emitted it.
#[derive(Debug)]
pub struct LogBatch<'a> {
    data: LogBatchData<'a>,
}

/// The batch processor owns boxed copies of its records; the simple
/// processor lends the caller's record.
#[derive(Debug)]
enum LogBatchData<'a> {
    Owned(&'a [Box<(SdkLogRecord, InstrumentationScope)>]),
    Borrowed(&'a [(&'a SdkLogRecord, &'a InstrumentationScope)]),
}

impl<'a> LogBatch<'a> {
    /// Creates a batch over borrowed records.
    pub fn new(data: &'a [(&'a SdkLogRecord, &'a InstrumentationScope)]) -> LogBatch<'a> {
        LogBatch {
            data: LogBatchData::Borrowed(data),
        }
    }

    pub(crate) fn new_with_owned_data(
        data: &'a [Box<(SdkLogRecord, InstrumentationScope)>],
    ) -> LogBatch<'a> {
        LogBatch {
            data: LogBatchData::Owned(data),
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        match self.data {
            LogBatchData::Owned(data) => data.len(),
            LogBatchData::Borrowed(data) => data.len(),
        }
    }

    /// Returns `true` if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the records and their instrumentation scopes.
    pub fn iter(&self) -> impl Iterator<Item = (&SdkLogRecord, &InstrumentationScope)> {
        let (owned, borrowed) = match self.data {
            LogBatchData::Owned(data) => (data, &[][..]),
            LogBatchData::Borrowed(data) => (&[][..], data),
        };
        owned
            .iter()
            .map(|entry| (&entry.0, &entry.1))
            .chain(borrowed.iter().map(|(record, scope)| (*record, *scope)))
    }
}

/// `LogExporter` defines the interface that log exporters should implement.
///
/// `export` is driven to completion with `futures_executor::block_on` on the
/// processor's thread, so implementations must not depend on a specific
/// async runtime being current.
pub trait LogExporter: Send + Sync + Debug + 'static {
    /// Exports a batch of log records.
    fn export(&self, batch: LogBatch<'_>) -> impl Future<Output = OTelSdkResult> + Send;

    /// Shuts down the exporter, waiting at most `timeout`.
    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }

    /// Shuts down the exporter with a five second timeout.
    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown_with_timeout(Duration::from_secs(5))
    }

    /// Exports anything buffered inside the exporter.
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    /// Sets the resource attached to every exported record.
    fn set_resource(&mut self, _resource: &Resource) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_yields_owned_and_borrowed_records() {
        let scope = InstrumentationScope::builder("test").build();
        let mut record = SdkLogRecord::new();
        record.set_body("hello");

        let owned = vec![Box::new((record.clone(), scope.clone()))];
        let batch = LogBatch::new_with_owned_data(&owned);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.iter().next().map(|(_, s)| s.name()), Some("test"));

        let borrowed = [(&record, &scope), (&record, &scope)];
        let batch = LogBatch::new(&borrowed);
        assert_eq!(batch.iter().count(), 2);
        assert!(!batch.is_empty());
    }
}
