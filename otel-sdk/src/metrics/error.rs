use std::result;
use std::sync::PoisonError;
use thiserror::Error;

/// Result of building views, aggregations and instruments.
pub type MetricResult<T> = result::Result<T, MetricError>;

/// Rejected metrics configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// Failure outside of user configuration, such as a poisoned lock.
    #[error("Metrics error: {0}")]
    Other(String),
    /// A view or aggregation that cannot be applied.
    #[error("Config error {0}")]
    Config(String),
    /// An instrument name, unit or boundary list that fails validation.
    #[error("Invalid instrument configuration: {0}")]
    InvalidInstrumentConfiguration(&'static str),
}

impl<T> From<PoisonError<T>> for MetricError {
    fn from(err: PoisonError<T>) -> Self {
        MetricError::Other(format!("lock poisoned: {err}"))
    }
}
