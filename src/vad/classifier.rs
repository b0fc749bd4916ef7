//! Per-frame speech classification.

use crate::audio::AudioFrame;

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDecision {
    pub is_speech: bool,
    /// Normalized RMS level (0.0 to 1.0).
    pub level: f32,
    /// Fraction of adjacent sample pairs that change sign.
    pub zero_crossing_rate: f32,
}

/// Decides whether a frame contains voice.
pub trait VoiceClassifier: Send {
    fn classify(&mut self, frame: &AudioFrame) -> FrameDecision;
}

impl VoiceClassifier for Box<dyn VoiceClassifier> {
    fn classify(&mut self, frame: &AudioFrame) -> FrameDecision {
        (**self).classify(frame)
    }
}

/// Minimum RMS level per aggressiveness step.
const ENERGY_THRESHOLDS: [f32; 4] = [0.005, 0.01, 0.02, 0.03];

/// Maximum zero-crossing rate per aggressiveness step.
///
/// Voiced speech sits well below 0.25 at 16kHz; broadband hiss and fans cross
/// zero on roughly every other sample.
const MAX_ZERO_CROSSING_RATES: [f32; 4] = [0.5, 0.4, 0.3, 0.25];

/// Energy plus zero-crossing classifier.
///
/// A frame is speech when it is loud enough and its zero-crossing rate stays in
/// the voiced band. Higher aggressiveness raises the energy floor and narrows
/// the band.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    energy_threshold: f32,
    max_zero_crossing_rate: f32,
}

impl EnergyClassifier {
    /// `aggressiveness` is clamped to 0..=3.
    pub fn new(aggressiveness: u8) -> Self {
        let step = aggressiveness.min(3) as usize;
        Self {
            energy_threshold: ENERGY_THRESHOLDS[step],
            max_zero_crossing_rate: MAX_ZERO_CROSSING_RATES[step],
        }
    }

    /// Override the energy floor, keeping the spectral bound.
    pub fn with_energy_threshold(mut self, threshold: f32) -> Self {
        self.energy_threshold = threshold;
        self
    }

    pub fn energy_threshold(&self) -> f32 {
        self.energy_threshold
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(crate::defaults::AGGRESSIVENESS)
    }
}

impl VoiceClassifier for EnergyClassifier {
    fn classify(&mut self, frame: &AudioFrame) -> FrameDecision {
        let level = frame.rms();
        let zero_crossing_rate = zero_crossing_rate(frame.samples());
        FrameDecision {
            is_speech: level >= self.energy_threshold
                && zero_crossing_rate <= self.max_zero_crossing_rate,
            level,
            zero_crossing_rate,
        }
    }
}

/// Fraction of adjacent sample pairs with opposite signs.
pub fn zero_crossing_rate(samples: &[i16]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0) != (pair[1] >= 0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}
