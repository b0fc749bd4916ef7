//! Frame-rate correlation test against recently played audio.

use crate::audio::AudioFrame;
use crate::audio::frame::{ms_to_samples, samples_to_duration};
use crate::defaults;
use crate::gate::loopback::LoopbackBuffer;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Coefficient at or above which a frame is treated as loopback.
    pub corr_threshold: f32,
    /// Largest speaker-to-microphone delay searched.
    pub max_lag_ms: u32,
    /// Coarse search step; the best coarse lag is refined sample by sample.
    pub lag_step_ms: u32,
    pub sample_rate: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            corr_threshold: defaults::CORR_THRESHOLD,
            max_lag_ms: defaults::MAX_LAG_MS,
            lag_step_ms: defaults::LAG_STEP_MS,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub gated: bool,
    /// Best coefficient found, -1.0 to 1.0. Zero when nothing was compared.
    pub correlation: f32,
    /// Lag of the best coefficient.
    pub lag_ms: f32,
}

impl GateDecision {
    fn open() -> Self {
        Self {
            gated: false,
            correlation: 0.0,
            lag_ms: 0.0,
        }
    }
}

/// Suppresses microphone frames that repeat what the speaker just played.
///
/// For a frame captured at `t`, each lag `d` in `[0, max_lag_ms]` is compared
/// against the loopback samples played at `t - d`. Signals are zero-mean and
/// normalized, so the threshold does not depend on speaker volume. A lag is
/// only considered when at least half of its reference window holds played
/// audio, so an empty or non-overlapping buffer never gates.
pub struct CorrelationGate {
    config: GateConfig,
    loopback: Arc<LoopbackBuffer>,
    max_lag: usize,
    step: usize,
}

impl CorrelationGate {
    pub fn new(config: GateConfig, loopback: Arc<LoopbackBuffer>) -> Self {
        let max_lag = ms_to_samples(config.max_lag_ms, config.sample_rate);
        let step = ms_to_samples(config.lag_step_ms, config.sample_rate).max(1);
        Self {
            config,
            loopback,
            max_lag,
            step,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluate(&self, frame: &AudioFrame) -> GateDecision {
        let len = frame.len();
        if len == 0 {
            return GateDecision::open();
        }
        let Some(centered) = Centered::new(frame.samples()) else {
            return GateDecision::open();
        };
        let window_start = frame
            .timestamp()
            .checked_sub(samples_to_duration(self.max_lag, self.config.sample_rate));
        let Some(window_start) = window_start else {
            return GateDecision::open();
        };

        // Index `max_lag - d` of the snapshot is the reference for lag `d`.
        let snapshot = self.loopback.snapshot(window_start, len + self.max_lag);
        if snapshot.is_empty() {
            return GateDecision::open();
        }

        let min_coverage = len.div_ceil(2);
        let score = |lag: usize| -> Option<f32> {
            let begin = self.max_lag - lag;
            let range = begin..begin + len;
            if snapshot.coverage(range.clone()) < min_coverage {
                return None;
            }
            Some(centered.correlate(&snapshot.samples[range]))
        };

        let mut best: Option<(usize, f32)> = None;
        let consider = |lag: usize, best: &mut Option<(usize, f32)>| {
            if let Some(corr) = score(lag)
                && best.is_none_or(|(_, b)| corr > b)
            {
                *best = Some((lag, corr));
            }
        };

        for lag in (0..=self.max_lag).step_by(self.step) {
            consider(lag, &mut best);
        }
        if self.step > 1
            && let Some((coarse, _)) = best
        {
            let low = coarse.saturating_sub(self.step - 1);
            let high = (coarse + self.step - 1).min(self.max_lag);
            for lag in low..=high {
                consider(lag, &mut best);
            }
        }

        let Some((lag, correlation)) = best else {
            return GateDecision::open();
        };
        let gated = correlation >= self.config.corr_threshold;
        if gated {
            tracing::trace!(correlation, lag, "frame matches loopback");
        }
        GateDecision {
            gated,
            correlation,
            lag_ms: lag as f32 * 1000.0 / self.config.sample_rate as f32,
        }
    }
}

/// A frame with its mean removed and its norm cached.
struct Centered {
    values: Vec<f64>,
    norm: f64,
}

impl Centered {
    fn new(samples: &[i16]) -> Option<Self> {
        let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64;
        let values: Vec<f64> = samples.iter().map(|&s| s as f64 - mean).collect();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        (norm > f64::EPSILON).then_some(Self { values, norm })
    }

    /// Normalized cross-correlation with a same-length reference.
    fn correlate(&self, reference: &[i16]) -> f32 {
        let mean = reference.iter().map(|&s| s as f64).sum::<f64>() / reference.len() as f64;
        let mut dot = 0.0;
        let mut energy = 0.0;
        for (&x, &y) in self.values.iter().zip(reference) {
            let y = y as f64 - mean;
            dot += x * y;
            energy += y * y;
        }
        let norm = energy.sqrt();
        if norm <= f64::EPSILON {
            return 0.0;
        }
        (dot / (self.norm * norm)) as f32
    }
}

/// Normalized zero-mean correlation of two equal-length signals.
pub fn normalized_correlation(a: &[i16], b: &[i16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    Centered::new(a).map_or(0.0, |centered| centered.correlate(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Clock, ManualClock};
    use std::time::{Duration, Instant};

    const RATE: u32 = 16000;
    const FRAME: usize = 320;

    fn noise(seed: u32, len: usize, amplitude: i32) -> Vec<i16> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                ((state >> 16) as i32 % (2 * amplitude) - amplitude) as i16
            })
            .collect()
    }

    struct Rig {
        clock: ManualClock,
        loopback: Arc<LoopbackBuffer>,
        played_at: Instant,
        played: Vec<i16>,
    }

    /// One second of noise-like "speech" played at `played_at`.
    fn rig() -> Rig {
        let clock = ManualClock::new();
        let played_at = clock.now();
        let loopback = Arc::new(LoopbackBuffer::new(
            RATE,
            Duration::from_millis(2000),
            Arc::new(clock.clone()),
        ));
        let played = noise(7, RATE as usize, 8000);
        loopback.append(played_at, &played);
        clock.advance(Duration::from_millis(500));
        Rig {
            clock,
            loopback,
            played_at,
            played,
        }
    }

    fn gate(rig: &Rig, threshold: f32) -> CorrelationGate {
        CorrelationGate::new(
            GateConfig {
                corr_threshold: threshold,
                max_lag_ms: 95,
                lag_step_ms: 1,
                sample_rate: RATE,
            },
            Arc::clone(&rig.loopback),
        )
    }

    /// Mic frame captured at `offset` after playback start, hearing the audio
    /// played `lag_ms` earlier.
    fn echo_frame(rig: &Rig, offset_ms: u64, lag_ms: u64, gain: f32, noise_amp: i32) -> AudioFrame {
        let start = ((offset_ms - lag_ms) * RATE as u64 / 1000) as usize;
        let extra = noise(99, FRAME, noise_amp.max(1));
        let samples: Vec<i16> = rig.played[start..start + FRAME]
            .iter()
            .zip(&extra)
            .map(|(&p, &n)| (p as f32 * gain) as i16 + if noise_amp > 0 { n } else { 0 })
            .collect();
        AudioFrame::new(
            samples,
            rig.played_at + Duration::from_millis(offset_ms),
            RATE,
            0,
        )
    }

    #[test]
    fn attenuated_lagged_copy_is_gated() {
        let rig = rig();
        let frame = echo_frame(&rig, 300, 60, 0.3, 0);

        let decision = gate(&rig, 0.6).evaluate(&frame);

        assert!(decision.gated);
        assert!(decision.correlation > 0.99);
        assert!((decision.lag_ms - 60.0).abs() < 0.1);
    }

    #[test]
    fn noisy_echo_at_60ms_gated_at_half_threshold() {
        let rig = rig();
        // Independent noise at ~2/3 of the echo level, so correlation lands near 0.8.
        let frame = echo_frame(&rig, 400, 60, 0.5, 2700);

        let decision = gate(&rig, 0.50).evaluate(&frame);

        assert!(decision.correlation > 0.6 && decision.correlation < 0.95);
        assert!(decision.gated);
    }

    #[test]
    fn every_lag_in_window_is_detected() {
        let rig = rig();
        let gate = gate(&rig, 0.6);
        for lag in [0, 1, 17, 42, 60, 95] {
            let frame = echo_frame(&rig, 250, lag, 0.8, 0);
            assert!(gate.evaluate(&frame).gated, "lag {} ms not gated", lag);
        }
    }

    #[test]
    fn lag_beyond_window_is_not_gated() {
        let rig = rig();
        let frame = echo_frame(&rig, 400, 200, 1.0, 0);
        assert!(!gate(&rig, 0.6).evaluate(&frame).gated);
    }

    #[test]
    fn unrelated_frame_of_equal_energy_is_not_gated() {
        let rig = rig();
        let unrelated = noise(12345, FRAME, 8000);
        let frame = AudioFrame::new(unrelated, rig.played_at + Duration::from_millis(300), RATE, 0);

        let decision = gate(&rig, 0.6).evaluate(&frame);

        assert!(!decision.gated);
        assert!(decision.correlation.abs() < 0.4);
    }

    #[test]
    fn empty_buffer_never_gates() {
        let clock = ManualClock::new();
        let loopback = Arc::new(LoopbackBuffer::new(RATE, Duration::from_secs(1), Arc::new(clock.clone())));
        let gate = CorrelationGate::new(GateConfig::default(), loopback);
        let frame = AudioFrame::new(noise(1, FRAME, 8000), clock.now(), RATE, 0);

        let decision = gate.evaluate(&frame);

        assert!(!decision.gated);
        assert_eq!(decision.correlation, 0.0);
    }

    #[test]
    fn frame_after_playback_ended_is_not_gated() {
        let rig = rig();
        // Playback covered [0, 1000ms); a frame at 1200ms has no overlapping lag.
        let frame = AudioFrame::new(
            rig.played[..FRAME].to_vec(),
            rig.played_at + Duration::from_millis(1200),
            RATE,
            0,
        );
        assert!(!gate(&rig, 0.1).evaluate(&frame).gated);
    }

    #[test]
    fn expired_playback_is_not_gated() {
        let rig = rig();
        let frame = echo_frame(&rig, 300, 60, 1.0, 0);
        rig.clock.advance(Duration::from_secs(10));
        assert!(!gate(&rig, 0.6).evaluate(&frame).gated);
    }

    #[test]
    fn silent_frame_is_not_gated() {
        let rig = rig();
        let frame = AudioFrame::new(vec![0; FRAME], rig.played_at + Duration::from_millis(300), RATE, 0);
        assert!(!gate(&rig, 0.0).evaluate(&frame).gated);
    }

    #[test]
    fn coarse_step_finds_lag_on_grid() {
        let rig = rig();
        let gate = CorrelationGate::new(
            GateConfig {
                corr_threshold: 0.6,
                max_lag_ms: 95,
                lag_step_ms: 5,
                sample_rate: RATE,
            },
            Arc::clone(&rig.loopback),
        );
        let frame = echo_frame(&rig, 300, 60, 0.5, 0);

        let decision = gate.evaluate(&frame);

        assert!(decision.gated);
        assert!((decision.lag_ms - 60.0).abs() < 0.1);
    }

    #[test]
    fn correlation_is_scale_invariant() {
        let a = noise(3, FRAME, 8000);
        let quiet: Vec<i16> = a.iter().map(|&s| s / 10).collect();
        let shifted: Vec<i16> = a.iter().map(|&s| s / 2 + 500).collect();
        assert!(normalized_correlation(&a, &quiet) > 0.99);
        assert!(normalized_correlation(&a, &shifted) > 0.99);
        assert_eq!(normalized_correlation(&a, &[0; FRAME]), 0.0);
        assert_eq!(normalized_correlation(&a, &a[..10]), 0.0);
    }
}
