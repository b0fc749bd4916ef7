//! Voice activity segmentation.
//!
//! A [`VoiceClassifier`] labels each frame, and the [`Segmenter`] turns labels
//! into utterance boundaries with debounce and hangover.

pub mod classifier;
pub mod segmenter;

pub use classifier::{EnergyClassifier, FrameDecision, VoiceClassifier};
pub use segmenter::{FrameKind, SegmentEvent, Segmenter, SegmenterConfig};
