//! Loopback correlation gate.
//!
//! The playback worker appends every block it plays to a [`LoopbackBuffer`];
//! the capture path asks the [`CorrelationGate`] whether a speech-like frame
//! is just the speaker heard again.

pub mod correlation;
pub mod loopback;

pub use correlation::{CorrelationGate, GateConfig, GateDecision, normalized_correlation};
pub use loopback::{LoopbackBuffer, Snapshot};
