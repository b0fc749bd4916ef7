//! Station failures and where they are reported.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StationError {
    /// The item is skipped and the station keeps running.
    #[error("Recoverable error: {0}")]
    Recoverable(String),
    /// The station shuts down.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

/// Receives every error a station returns, on the station thread.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, station: &str, error: &StationError);
}

/// Reports through `tracing`: recoverable errors as warnings, fatal ones as
/// errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        if error.is_fatal() {
            tracing::error!(station, %error, "station stopped");
        } else {
            tracing::warn!(station, %error, "station skipped an item");
        }
    }
}
