//! Capture pipeline.
//!
//! The capture thread frames the audio source and feeds the capture station,
//! which runs the classifier, the loopback gate and the segmenter on its own
//! thread. Stations are connected by bounded crossbeam channels.

pub mod capture;
pub mod capture_station;
pub mod error;
pub mod station;

pub use capture::{CaptureConfig, CaptureHandle, spawn_capture};
pub use capture_station::{CaptureEvent, CaptureInput, CaptureStation, CaptureStats};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use station::{Station, StationRunner};
