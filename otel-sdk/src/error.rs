//! Errors returned by SDK lifecycle and export operations.
use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by shutdown, flush and export operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OTelSdkError {
    /// Shutdown has already been invoked.
    ///
    /// Calling `shutdown` twice, or flushing/exporting after `shutdown`,
    /// indicates a lifecycle problem in the application.
    #[error("Shutdown already invoked")]
    AlreadyShutdown,

    /// The operation did not complete within the given duration.
    #[error("Operation timed out after {} milliseconds", .0.as_millis())]
    Timeout(Duration),

    /// The operation failed. The message describes the cause; retrying the
    /// same call is unlikely to help.
    #[error("Operation failed: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for OTelSdkError {
    fn from(err: PoisonError<T>) -> Self {
        OTelSdkError::InternalFailure(format!("lock poisoned: {}", err))
    }
}

/// A specialized `Result` type for shutdown, flush and export operations.
pub type OTelSdkResult = Result<(), OTelSdkError>;
