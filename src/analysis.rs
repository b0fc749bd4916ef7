//! Offline run of the capture pipeline over a recording.
//!
//! Frames are timestamped from the sample count and the loopback buffer runs
//! on a [`ManualClock`] that follows the frames, so a recording is analyzed
//! exactly as it would have been captured live, only faster.

use crate::audio::frame::samples_to_duration;
use crate::audio::{AudioFrame, CloseReason, FrameAssembler, ManualClock, Utterance};
use crate::config::Config;
use crate::error::{HaloError, Result};
use crate::gate::{CorrelationGate, LoopbackBuffer};
use crate::pipeline::{CaptureEvent, CaptureInput, CaptureStation, CaptureStats, Station};
use crate::vad::{EnergyClassifier, VoiceClassifier};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Audio treated as played through the speaker during the recording.
#[derive(Debug, Clone)]
pub struct LoopbackTrack {
    pub samples: Vec<i16>,
    /// Offset of the first played sample from the start of the recording.
    pub delay: Duration,
}

/// One closed utterance, with times relative to the start of the recording.
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceReport {
    pub id: u64,
    pub start: Duration,
    pub duration: Duration,
    pub frames: usize,
    pub gated_frames: u32,
    pub close_reason: CloseReason,
    pub rms: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub duration: Duration,
    pub utterances: Vec<UtteranceReport>,
    pub stats: CaptureStats,
}

/// Publishes a [`LoopbackTrack`] into the buffer as playback time passes.
struct LoopbackFeeder {
    buffer: Arc<LoopbackBuffer>,
    track: LoopbackTrack,
    sample_rate: u32,
    started: Instant,
    published: usize,
}

impl LoopbackFeeder {
    /// Append every sample played before `until`.
    fn advance(&mut self, until: Instant) {
        let Some(elapsed) = until.checked_duration_since(self.started) else {
            return;
        };
        let due = ((elapsed.as_secs_f64() * f64::from(self.sample_rate)) as usize)
            .min(self.track.samples.len());
        if due <= self.published {
            return;
        }
        let played_at = self.started + samples_to_duration(self.published, self.sample_rate);
        self.buffer
            .append(played_at, &self.track.samples[self.published..due]);
        self.published = due;
    }
}

/// Run classifier, gate and segmenter over `samples` recorded at
/// `config.audio.sample_rate`.
///
/// The gate is only attached when a loopback track is given.
pub fn analyze(
    config: &Config,
    samples: &[i16],
    loopback: Option<LoopbackTrack>,
) -> Result<AnalysisReport> {
    analyze_with(
        config,
        Box::new(EnergyClassifier::new(config.vad.aggressiveness)),
        samples,
        loopback,
    )
}

/// [`analyze`] with a caller-supplied classifier.
pub fn analyze_with(
    config: &Config,
    classifier: Box<dyn VoiceClassifier>,
    samples: &[i16],
    loopback: Option<LoopbackTrack>,
) -> Result<AnalysisReport> {
    config.validate()?;
    let sample_rate = config.audio.sample_rate;
    let origin = Instant::now();
    let clock = Arc::new(ManualClock::starting_at(origin));

    let mut station = CaptureStation::new(classifier, config.segmenter());
    let mut feeder = loopback.map(|track| {
        let buffer = Arc::new(LoopbackBuffer::new(
            sample_rate,
            Duration::from_millis(u64::from(config.gate.retention_ms)),
            clock.clone(),
        ));
        LoopbackFeeder {
            buffer,
            started: origin + track.delay,
            track,
            sample_rate,
            published: 0,
        }
    });
    if let Some(feeder) = &feeder {
        station = station.with_gate(CorrelationGate::new(config.gate(), feeder.buffer.clone()));
    }

    let mut assembler = FrameAssembler::new(config.frame_len(), sample_rate, origin);
    let mut frames = assembler.push(samples);
    frames.extend(assembler.flush());
    tracing::debug!(frames = frames.len(), sample_rate, "analyzing recording");

    let mut utterances = Vec::new();
    for frame in frames {
        let end = frame.end();
        clock.set(end);
        if let Some(feeder) = &mut feeder {
            feeder.advance(end);
        }
        let event = station
            .process(CaptureInput::Frame(frame))
            .map_err(|e| HaloError::Other(e.to_string()))?;
        if let Some(CaptureEvent::UtteranceReady(utterance)) = event {
            utterances.push(report(&utterance, origin));
        }
    }
    for event in station.finish() {
        if let CaptureEvent::UtteranceReady(utterance) = event {
            utterances.push(report(&utterance, origin));
        }
    }
    station.shutdown();

    Ok(AnalysisReport {
        duration: samples_to_duration(samples.len(), sample_rate),
        utterances,
        stats: station.stats(),
    })
}

fn report(utterance: &Utterance, origin: Instant) -> UtteranceReport {
    let start = utterance
        .start()
        .map(|at| at.saturating_duration_since(origin))
        .unwrap_or_default();
    let rms = {
        let frames = utterance.frames();
        if frames.is_empty() {
            0.0
        } else {
            frames.iter().map(AudioFrame::rms).sum::<f32>() / frames.len() as f32
        }
    };
    UtteranceReport {
        id: utterance.id(),
        start,
        duration: utterance.duration(),
        frames: utterance.frames().len(),
        gated_frames: utterance.gated_frames(),
        close_reason: utterance.close_reason(),
        rms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, freq: f32, amplitude: f32, sample_rate: u32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn chirp(len: usize, sample_rate: u32) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let freq = 300.0 + 900.0 * t;
                (12000.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn test_silence_yields_no_utterances() {
        let config = Config::default();
        let report = analyze(&config, &vec![0; 16000], None).unwrap();
        assert!(report.utterances.is_empty());
        assert_eq!(report.stats.frames, 50);
        assert_eq!(report.stats.speech_frames, 0);
        assert_eq!(report.duration, Duration::from_secs(1));
    }

    #[test]
    fn test_speech_burst_is_reported_with_timing() {
        let config = Config::default();
        let mut samples = vec![0i16; 8000];
        samples.extend(tone(16000, 440.0, 10000.0, 16000));
        samples.extend(vec![0i16; 16000]);

        let report = analyze(&config, &samples, None).unwrap();
        assert_eq!(report.utterances.len(), 1);
        let utterance = &report.utterances[0];
        assert_eq!(utterance.close_reason, CloseReason::Hangover);
        assert_eq!(utterance.gated_frames, 0);
        // Pre-roll reaches back before the burst at 500ms.
        assert!(utterance.start < Duration::from_millis(500));
        assert!(utterance.start >= Duration::from_millis(380));
        assert!(utterance.rms > 0.0);
    }

    #[test]
    fn test_open_utterance_closes_at_end_of_recording() {
        let config = Config::default();
        let samples = tone(16000, 440.0, 10000.0, 16000);
        let report = analyze(&config, &samples, None).unwrap();
        assert_eq!(report.utterances.len(), 1);
        assert_eq!(report.utterances[0].close_reason, CloseReason::EndOfInput);
    }

    #[test]
    fn test_played_audio_in_recording_is_gated() {
        let config = Config::default();
        let played = chirp(16000, 16000);
        // The microphone hears the speaker 40ms late, at half volume.
        let lag = 640;
        let mut recorded = vec![0i16; lag];
        recorded.extend(played.iter().map(|s| s / 2));

        let report = analyze(
            &config,
            &recorded,
            Some(LoopbackTrack {
                samples: played,
                delay: Duration::ZERO,
            }),
        )
        .unwrap();
        assert!(report.stats.speech_frames > 0);
        assert!(
            report.stats.gated_frames * 10 >= report.stats.speech_frames * 9,
            "stats: {:?}",
            report.stats
        );
        assert!(report.utterances.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.vad.hangover_frames = 0;
        assert!(analyze(&config, &[0; 320], None).is_err());
    }
}
