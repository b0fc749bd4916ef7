//! Classifier, loopback gate and segmenter as one station.

use crate::audio::{AudioFrame, Utterance};
use crate::gate::CorrelationGate;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::vad::{FrameKind, SegmentEvent, Segmenter, SegmenterConfig, VoiceClassifier};
use std::time::Instant;

/// What the capture thread hands to the station.
#[derive(Debug, Clone)]
pub enum CaptureInput {
    Frame(AudioFrame),
    /// The audio source gave up.
    DeviceFailed(String),
}

/// What the station reports to the conversation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    SpeechStarted { utterance_id: u64, at: Instant },
    UtteranceReady(Utterance),
    DeviceFailed(String),
}

impl From<SegmentEvent> for CaptureEvent {
    fn from(event: SegmentEvent) -> Self {
        match event {
            SegmentEvent::SpeechStarted { utterance_id, at } => {
                CaptureEvent::SpeechStarted { utterance_id, at }
            }
            SegmentEvent::Closed(utterance) => CaptureEvent::UtteranceReady(utterance),
        }
    }
}

/// Frame counters, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub speech_frames: u64,
    pub gated_frames: u64,
}

/// Turns frames into utterance events.
///
/// The gate is only consulted for frames the classifier calls speech; a gated
/// frame reaches the segmenter as [`FrameKind::Loopback`].
pub struct CaptureStation {
    classifier: Box<dyn VoiceClassifier>,
    gate: Option<CorrelationGate>,
    segmenter: Segmenter,
    stats: CaptureStats,
}

impl CaptureStation {
    pub fn new(classifier: Box<dyn VoiceClassifier>, segmenter: SegmenterConfig) -> Self {
        Self {
            classifier,
            gate: None,
            segmenter: Segmenter::new(segmenter),
            stats: CaptureStats::default(),
        }
    }

    pub fn with_gate(mut self, gate: CorrelationGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    fn classify(&mut self, frame: &AudioFrame) -> FrameKind {
        self.stats.frames += 1;
        let decision = self.classifier.classify(frame);
        if !decision.is_speech {
            return FrameKind::NonSpeech;
        }
        self.stats.speech_frames += 1;

        if let Some(gate) = &self.gate {
            let verdict = gate.evaluate(frame);
            if verdict.gated {
                self.stats.gated_frames += 1;
                tracing::debug!(
                    sequence = frame.sequence(),
                    correlation = verdict.correlation,
                    lag_ms = verdict.lag_ms,
                    "frame gated as loopback"
                );
                return FrameKind::Loopback;
            }
        }
        FrameKind::Speech
    }
}

impl Station for CaptureStation {
    type Input = CaptureInput;
    type Output = CaptureEvent;

    fn process(&mut self, input: CaptureInput) -> Result<Option<CaptureEvent>, StationError> {
        match input {
            CaptureInput::Frame(frame) => {
                let kind = self.classify(&frame);
                Ok(self.segmenter.push(frame, kind).map(CaptureEvent::from))
            }
            CaptureInput::DeviceFailed(message) => Ok(Some(CaptureEvent::DeviceFailed(message))),
        }
    }

    fn name(&self) -> &'static str {
        "capture"
    }

    fn finish(&mut self) -> Vec<CaptureEvent> {
        self.segmenter
            .finish()
            .map(CaptureEvent::from)
            .into_iter()
            .collect()
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            frames = self.stats.frames,
            speech = self.stats.speech_frames,
            gated = self.stats.gated_frames,
            "capture station finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Clock, CloseReason, ManualClock};
    use crate::gate::{GateConfig, LoopbackBuffer};
    use crate::vad::EnergyClassifier;
    use std::sync::Arc;
    use std::time::Duration;

    const FRAME: usize = 320;

    fn config() -> SegmenterConfig {
        SegmenterConfig {
            min_consecutive_speech_frames: 3,
            hangover_frames: 2,
            pre_roll_frames: 0,
            max_frames: 100,
        }
    }

    /// 200 Hz square-ish tone: loud, low zero-crossing rate.
    fn voiced(seed: usize) -> Vec<i16> {
        (0..FRAME)
            .map(|i| if ((i + seed) / 40) % 2 == 0 { 8000 } else { -8000 })
            .collect()
    }

    fn frame(samples: Vec<i16>, t0: Instant, index: u64) -> AudioFrame {
        AudioFrame::new(samples, t0 + Duration::from_millis(20 * index), 16000, index)
    }

    fn run(station: &mut CaptureStation, frames: Vec<AudioFrame>) -> Vec<CaptureEvent> {
        let mut events: Vec<CaptureEvent> = frames
            .into_iter()
            .filter_map(|f| station.process(CaptureInput::Frame(f)).unwrap())
            .collect();
        events.extend(station.finish());
        events
    }

    #[test]
    fn test_speech_opens_and_closes_utterance() {
        let t0 = Instant::now();
        let mut station = CaptureStation::new(Box::new(EnergyClassifier::new(1)), config());

        let mut frames = Vec::new();
        for i in 0..4 {
            frames.push(frame(voiced(0), t0, i));
        }
        for i in 4..6 {
            frames.push(frame(vec![0; FRAME], t0, i));
        }

        let events = run(&mut station, frames);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CaptureEvent::SpeechStarted { utterance_id: 1, .. }));
        match &events[1] {
            CaptureEvent::UtteranceReady(utterance) => {
                assert_eq!(utterance.frames().len(), 6);
                assert_eq!(utterance.close_reason(), CloseReason::Hangover);
            }
            other => panic!("expected utterance, got {other:?}"),
        }
        assert_eq!(
            station.stats(),
            CaptureStats {
                frames: 6,
                speech_frames: 4,
                gated_frames: 0
            }
        );
    }

    #[test]
    fn test_open_utterance_is_closed_at_end_of_input() {
        let t0 = Instant::now();
        let mut station = CaptureStation::new(Box::new(EnergyClassifier::new(1)), config());
        let frames = (0..5).map(|i| frame(voiced(0), t0, i)).collect();

        let events = run(&mut station, frames);
        match events.last() {
            Some(CaptureEvent::UtteranceReady(utterance)) => {
                assert_eq!(utterance.close_reason(), CloseReason::EndOfInput)
            }
            other => panic!("expected utterance, got {other:?}"),
        }
    }

    #[test]
    fn test_played_audio_is_gated() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let loopback = Arc::new(LoopbackBuffer::new(
            16000,
            Duration::from_millis(1000),
            Arc::new(clock.clone()),
        ));
        let gate = CorrelationGate::new(GateConfig::default(), loopback.clone());
        let mut station =
            CaptureStation::new(Box::new(EnergyClassifier::new(1)), config()).with_gate(gate);

        // The speaker plays the tone; the mic hears it 30 ms later.
        let played: Vec<i16> = (0..10).flat_map(|i| voiced(i * FRAME)).collect();
        loopback.append(t0, &played);
        let lag = Duration::from_millis(30);
        let frames = (0..6)
            .map(|i| {
                let start = i as usize * FRAME;
                AudioFrame::new(
                    played[start..start + FRAME].iter().map(|s| s / 2).collect(),
                    t0 + lag + Duration::from_millis(20 * i),
                    16000,
                    i,
                )
            })
            .collect();
        clock.advance(Duration::from_millis(200));

        let events = run(&mut station, frames);
        assert!(events.is_empty(), "unexpected events {events:?}");
        assert_eq!(station.stats().gated_frames, 6);
    }

    #[test]
    fn test_device_failure_is_forwarded() {
        let mut station = CaptureStation::new(Box::new(EnergyClassifier::new(1)), config());
        let event = station
            .process(CaptureInput::DeviceFailed("unplugged".to_string()))
            .unwrap();
        assert_eq!(event, Some(CaptureEvent::DeviceFailed("unplugged".to_string())));
    }
}
