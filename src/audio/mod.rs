//! Audio I/O: frames, sources, sinks and devices.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod clock;
pub mod frame;
#[cfg(feature = "cpal-audio")]
pub mod output;
pub mod sink;
pub mod source;
pub mod wav;

pub use clock::{Clock, ManualClock, SystemClock};
pub use frame::{AudioFrame, CloseReason, FrameAssembler, Utterance, calculate_rms};
pub use sink::{AudioSink, MockAudioSink};
pub use source::{AudioSource, MockAudioSource};
