//! Thread-per-station processing with channel wiring.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A processing stage running on its own thread.
///
/// Stations are connected by bounded crossbeam channels; a full output
/// channel stalls the station, which in turn fills its input.
pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - produced output
    /// - `Ok(None)` - consumed the input without output
    /// - `Err(StationError)` - processing failed
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Name used in logs and error reports.
    fn name(&self) -> &'static str;

    /// Outputs still owed once the input channel has closed.
    fn finish(&mut self) -> Vec<Self::Output> {
        Vec::new()
    }

    /// Called last, on the station thread.
    fn shutdown(&mut self) {}
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawn `station`, feeding it from `input_rx` and forwarding to `output_tx`.
    ///
    /// The station stops when its input closes, when its output receiver is
    /// dropped, or on a fatal error. Recoverable errors are reported and
    /// processing continues.
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("halo-{station_name}"))
            .spawn(move || {
                Self::run_station(&mut station, input_rx, output_tx, error_reporter);
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(station = station_name, error = %e, "failed to spawn station thread");
                None
            }
        };

        Self {
            handle,
            station_name,
            _phantom: PhantomData,
        }
    }

    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) {
        let station_name = station.name();
        let mut drain = true;

        while let Ok(input) = input_rx.recv() {
            match station.process(input) {
                Ok(Some(output)) => {
                    if output_tx.send(output).is_err() {
                        drain = false;
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    error_reporter.report(station_name, &error);
                    if error.is_fatal() {
                        drain = false;
                        break;
                    }
                }
            }
        }

        if drain {
            for output in station.finish() {
                if output_tx.send(output).is_err() {
                    break;
                }
            }
        }

        station.shutdown();
        tracing::debug!(station = station_name, "station stopped");
    }

    /// Wait for the station thread to finish.
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &'static str {
        self.station_name
    }
}
