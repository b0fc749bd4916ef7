//! External speech and language services.
//!
//! The conversation layer reaches the recognizer, the language model and the
//! synthesizer only through these traits. Calls are blocking; the runtime
//! runs each one on its own job thread.

pub mod mock;

use crate::audio::Utterance;
use crate::conversation::ConversationTurn;
use crate::error::BackendError;
use std::sync::Arc;
use std::time::Duration;

pub use mock::{MockRecognizer, MockResponder, MockSynthesizer};

/// A recognizer's reading of one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptCandidate {
    pub text: String,
    /// Recognizer confidence in `[0, 1]`; 1.0 when the backend reports none.
    pub confidence: f32,
    pub latency: Duration,
    pub utterance_id: u64,
}

impl TranscriptCandidate {
    pub fn new(text: impl Into<String>, utterance_id: u64) -> Self {
        Self {
            text: text.into(),
            confidence: 1.0,
            latency: Duration::ZERO,
            utterance_id,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Synthesized mono PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn duration(&self) -> Duration {
        crate::audio::frame::samples_to_duration(self.samples.len(), self.sample_rate)
    }
}

/// Synthesizer voice selection.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub speaker: u32,
    pub speed_scale: f32,
    pub pitch_scale: f32,
    pub intonation_scale: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            speaker: crate::defaults::SPEAKER,
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
        }
    }
}

/// Streamed response text, fragment by fragment.
pub type TextStream = Box<dyn Iterator<Item = Result<String, BackendError>> + Send>;

/// Speech-to-text.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, utterance: &Utterance) -> Result<TranscriptCandidate, BackendError>;
}

/// Language model producing a streamed reply.
pub trait Responder: Send + Sync {
    /// Start a reply to `user_text` given the windowed conversation history.
    fn respond(&self, history: &[ConversationTurn], user_text: &str)
    -> Result<TextStream, BackendError>;
}

/// Text-to-speech.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Pcm, BackendError>;
}

impl<T: Recognizer + ?Sized> Recognizer for Arc<T> {
    fn recognize(&self, utterance: &Utterance) -> Result<TranscriptCandidate, BackendError> {
        (**self).recognize(utterance)
    }
}

impl<T: Responder + ?Sized> Responder for Arc<T> {
    fn respond(
        &self,
        history: &[ConversationTurn],
        user_text: &str,
    ) -> Result<TextStream, BackendError> {
        (**self).respond(history, user_text)
    }
}

impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Pcm, BackendError> {
        (**self).synthesize(text, voice)
    }
}

/// Handles to the three services, shared with the job threads.
#[derive(Clone)]
pub struct Services {
    pub recognizer: Arc<dyn Recognizer>,
    pub responder: Arc<dyn Responder>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Services {
    pub fn new(
        recognizer: impl Recognizer + 'static,
        responder: impl Responder + 'static,
        synthesizer: impl Synthesizer + 'static,
    ) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            responder: Arc::new(responder),
            synthesizer: Arc::new(synthesizer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_defaults() {
        let candidate = TranscriptCandidate::new("こんにちは", 3);
        assert_eq!(candidate.confidence, 1.0);
        assert_eq!(candidate.latency, Duration::ZERO);
        assert_eq!(candidate.utterance_id, 3);
    }

    #[test]
    fn test_pcm_duration() {
        let pcm = Pcm::new(vec![0; 8000], 16000);
        assert_eq!(pcm.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_traits_are_object_safe() {
        let recognizer: Box<dyn Recognizer> = Box::new(MockRecognizer::new());
        let responder: Box<dyn Responder> = Box::new(MockResponder::new());
        let synthesizer: Box<dyn Synthesizer> = Box::new(MockSynthesizer::new(16000));

        let pcm = synthesizer
            .synthesize("テスト", &VoiceParams::default())
            .unwrap();
        assert!(!pcm.samples.is_empty());
        assert!(responder.respond(&[], "hi").is_ok());
        drop(recognizer);
    }
}
