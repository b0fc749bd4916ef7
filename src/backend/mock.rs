//! Scripted service implementations for tests and offline runs.

use super::{Pcm, Recognizer, Responder, Synthesizer, TextStream, TranscriptCandidate, VoiceParams};
use crate::audio::Utterance;
use crate::conversation::ConversationTurn;
use crate::error::BackendError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Recognizer answering from a script, one entry per call.
///
/// Once the script runs out every call fails with `NoSpeech`.
#[derive(Debug, Default)]
pub struct MockRecognizer {
    script: Mutex<VecDeque<Result<(String, f32), BackendError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transcript with full confidence.
    pub fn with_response(self, text: &str) -> Self {
        self.with_scored_response(text, 1.0)
    }

    pub fn with_scored_response(self, text: &str, confidence: f32) -> Self {
        lock(&self.script).push_back(Ok((text.to_string(), confidence)));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, error: BackendError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recognizer for MockRecognizer {
    fn recognize(&self, utterance: &Utterance) -> Result<TranscriptCandidate, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let next = lock(&self.script).pop_front();
        match next {
            Some(Ok((text, confidence))) => Ok(TranscriptCandidate::new(text, utterance.id())
                .with_confidence(confidence)
                .with_latency(self.delay)),
            Some(Err(e)) => Err(e),
            None => Err(BackendError::NoSpeech),
        }
    }
}

/// A request the responder received.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRequest {
    pub user_text: String,
    pub history: Vec<ConversationTurn>,
}

/// Responder streaming scripted replies, one reply per call.
///
/// Once the script runs out every call streams an empty reply.
#[derive(Debug, Default)]
pub struct MockResponder {
    script: Mutex<VecDeque<Result<Vec<Result<String, BackendError>>, BackendError>>>,
    fragment_delay: Duration,
    requests: Mutex<Vec<ResponseRequest>>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply streamed as the given fragments.
    pub fn with_reply(self, fragments: &[&str]) -> Self {
        let fragments = fragments.iter().map(|f| Ok(f.to_string())).collect();
        lock(&self.script).push_back(Ok(fragments));
        self
    }

    /// Queue a reply whose stream yields these items, errors included.
    pub fn with_stream(self, items: Vec<Result<String, BackendError>>) -> Self {
        lock(&self.script).push_back(Ok(items));
        self
    }

    /// Queue a call that fails before streaming.
    pub fn with_failure(self, error: BackendError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Sleep this long before yielding each fragment.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        lock(&self.requests).clone()
    }
}

impl Responder for MockResponder {
    fn respond(
        &self,
        history: &[ConversationTurn],
        user_text: &str,
    ) -> Result<TextStream, BackendError> {
        lock(&self.requests).push(ResponseRequest {
            user_text: user_text.to_string(),
            history: history.to_vec(),
        });
        let items = lock(&self.script).pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
        let delay = self.fragment_delay;
        Ok(Box::new(items.into_iter().inspect(move |_| {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        })))
    }
}

/// Synthesizer producing a quiet tone whose length follows the text.
#[derive(Debug)]
pub struct MockSynthesizer {
    sample_rate: u32,
    ms_per_char: u32,
    fail_on: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ms_per_char: 10,
            fail_on: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_ms_per_char(mut self, ms: u32) -> Self {
        self.ms_per_char = ms;
        self
    }

    /// Fail with `InvalidVoice` for any text containing `needle`.
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Texts synthesized so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Pcm, BackendError> {
        lock(&self.calls).push(text.to_string());
        if let Some(needle) = &self.fail_on
            && text.contains(needle.as_str())
        {
            return Err(BackendError::InvalidVoice(format!(
                "speaker {} cannot say {text:?}",
                voice.speaker
            )));
        }

        let len = text.chars().count() * self.ms_per_char as usize * self.sample_rate as usize / 1000;
        let step = 2.0 * std::f32::consts::PI * 440.0 / self.sample_rate as f32;
        let samples = (0..len).map(|i| ((i as f32 * step).sin() * 4000.0) as i16).collect();
        Ok(Pcm::new(samples, self.sample_rate))
    }
}
