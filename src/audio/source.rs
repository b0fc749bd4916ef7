use crate::error::{HaloError, Result};
use std::collections::VecDeque;

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples arrived since the last call.
    ///
    /// An empty read from a live source is normal; from a finite source it means the
    /// input is exhausted.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Sample rate of the returned samples.
    fn sample_rate(&self) -> u32;

    /// Whether the source ends (file, pipe) rather than streaming forever.
    fn is_finite(&self) -> bool {
        false
    }
}

impl AudioSource for Box<dyn AudioSource> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        (**self).read_samples()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn is_finite(&self) -> bool {
        (**self).is_finite()
    }
}

/// Mock audio source for testing
///
/// With [`with_chunks`](Self::with_chunks) it replays a fixed script and then
/// reports end of input; otherwise it returns the same samples on every read.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    chunks: Option<VecDeque<Vec<i16>>>,
    sample_rate: u32,
    should_fail_start: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            chunks: None,
            sample_rate: crate::defaults::SAMPLE_RATE,
            should_fail_start: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Replay these reads in order, then end
    pub fn with_chunks(mut self, chunks: Vec<Vec<i16>>) -> Self {
        self.chunks = Some(chunks.into());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(HaloError::AudioDevice {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            return Err(HaloError::AudioDevice {
                message: self.error_message.clone(),
            });
        }
        match self.chunks.as_mut() {
            Some(chunks) => Ok(chunks.pop_front().unwrap_or_default()),
            None => Ok(self.samples.clone()),
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.chunks.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![100i16, 200, 300, 400, 500];
        let mut source = MockAudioSource::new().with_samples(test_samples.clone());

        assert_eq!(source.read_samples().unwrap(), test_samples);
        assert_eq!(source.read_samples().unwrap(), test_samples);
        assert!(!source.is_finite());
    }

    #[test]
    fn test_mock_audio_source_replays_chunks_then_ends() {
        let mut source = MockAudioSource::new().with_chunks(vec![vec![1, 2], vec![3]]);

        assert!(source.is_finite());
        assert_eq!(source.read_samples().unwrap(), vec![1, 2]);
        assert_eq!(source.read_samples().unwrap(), vec![3]);
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_mock_audio_source_returns_custom_read_error() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(HaloError::AudioDevice { message }) => assert_eq!(message, "buffer overflow"),
            other => panic!("Expected AudioDevice error, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_audio_source_start_stop() {
        let mut source = MockAudioSource::new();
        source.start().unwrap();
        assert!(source.is_started());
        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();
        assert!(source.start().is_err());
        assert!(!source.is_started());
    }

    #[test]
    fn test_boxed_source_forwards_calls() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_sample_rate(8000).with_chunks(vec![vec![5]]));
        assert_eq!(source.sample_rate(), 8000);
        assert!(source.is_finite());
        assert_eq!(source.read_samples().unwrap(), vec![5]);
    }
}
