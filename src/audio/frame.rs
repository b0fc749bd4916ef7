//! Fixed-duration audio frames and the utterances built from them.

use std::time::{Duration, Instant};

/// One fixed-length block of mono PCM, immutable once captured.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    timestamp: Instant,
    sample_rate: u32,
    sequence: u64,
}

impl AudioFrame {
    /// `timestamp` is the capture time of the first sample.
    pub fn new(samples: Vec<i16>, timestamp: Instant, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            timestamp,
            sample_rate,
            sequence,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Capture time just past the last sample.
    pub fn end(&self) -> Instant {
        self.timestamp + self.duration()
    }

    /// Normalized RMS level, 0.0 to 1.0.
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.samples)
    }
}

/// Why an utterance stopped accumulating frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Trailing run of non-speech frames reached the hangover.
    Hangover,
    /// Utterance hit the configured maximum length.
    MaxLength,
    /// Input ended while the utterance was open.
    EndOfInput,
}

/// Frames between a confirmed speech start and the end of the hangover.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    id: u64,
    frames: Vec<AudioFrame>,
    close_reason: CloseReason,
    gated_frames: u32,
}

impl Utterance {
    pub fn new(id: u64, frames: Vec<AudioFrame>, close_reason: CloseReason, gated_frames: u32) -> Self {
        Self {
            id,
            frames,
            close_reason,
            gated_frames,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn close_reason(&self) -> CloseReason {
        self.close_reason
    }

    /// Frames the loopback gate vetoed while this utterance was open.
    pub fn gated_frames(&self) -> u32 {
        self.gated_frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map_or(0, AudioFrame::sample_rate)
    }

    pub fn start(&self) -> Option<Instant> {
        self.frames.first().map(AudioFrame::timestamp)
    }

    pub fn end(&self) -> Option<Instant> {
        self.frames.last().map(AudioFrame::end)
    }

    pub fn duration(&self) -> Duration {
        self.frames.iter().map(AudioFrame::duration).sum()
    }

    /// All samples concatenated, ready for a recognizer.
    pub fn samples(&self) -> Vec<i16> {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }
}

/// Slices arbitrarily sized reads into fixed frames with sample-accurate timestamps.
///
/// Timestamps are derived from the sample count since `origin`, not from the
/// wall clock at read time, so polling jitter never skews frame alignment.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    origin: Instant,
    pending: Vec<i16>,
    emitted_samples: u64,
    sequence: u64,
}

impl FrameAssembler {
    pub fn new(frame_len: usize, sample_rate: u32, origin: Instant) -> Self {
        Self {
            frame_len: frame_len.max(1),
            sample_rate,
            origin,
            pending: Vec::with_capacity(frame_len * 2),
            emitted_samples: 0,
            sequence: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Appends samples and returns every frame that is now complete.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);
        let mut frames = Vec::with_capacity(self.pending.len() / self.frame_len);
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            let chunk = std::mem::replace(&mut self.pending, rest);
            frames.push(self.emit(chunk));
        }
        frames
    }

    /// Emits the remaining partial frame, zero-padded to full length.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut chunk = std::mem::take(&mut self.pending);
        chunk.resize(self.frame_len, 0);
        Some(self.emit(chunk))
    }

    fn emit(&mut self, chunk: Vec<i16>) -> AudioFrame {
        let timestamp = self.origin + samples_to_duration(self.emitted_samples as usize, self.sample_rate);
        self.emitted_samples += chunk.len() as u64;
        let frame = AudioFrame::new(chunk, timestamp, self.sample_rate, self.sequence);
        self.sequence += 1;
        frame
    }
}

/// Calculate RMS (Root Mean Square) of audio samples.
///
/// # Returns
/// RMS value normalized to 0.0-1.0 range
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((samples as u128 * 1_000_000_000 / sample_rate as u128) as u64)
}

/// Sample count covering `ms` milliseconds, rounded down.
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_duration_and_end() {
        let start = Instant::now();
        let frame = AudioFrame::new(vec![0; 320], start, 16000, 0);
        assert_eq!(frame.duration(), Duration::from_millis(20));
        assert_eq!(frame.end(), start + Duration::from_millis(20));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(calculate_rms(&[0; 100]), 0.0);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_full_scale_square_is_one() {
        let samples: Vec<i16> = (0..100)
            .map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX })
            .collect();
        assert!((calculate_rms(&samples) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn assembler_emits_fixed_frames_across_reads() {
        let origin = Instant::now();
        let mut assembler = FrameAssembler::new(160, 16000, origin);

        assert!(assembler.push(&[1; 100]).is_empty());
        let frames = assembler.push(&[2; 300]);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 160);
        assert_eq!(frames[0].samples()[99], 1);
        assert_eq!(frames[0].samples()[100], 2);
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(frames[1].sequence(), 1);
        assert_eq!(frames[1].timestamp(), origin + Duration::from_millis(10));
    }

    #[test]
    fn assembler_flush_pads_partial_frame() {
        let mut assembler = FrameAssembler::new(160, 16000, Instant::now());
        assembler.push(&[7; 40]);

        let frame = assembler.flush().unwrap();

        assert_eq!(frame.len(), 160);
        assert_eq!(frame.samples()[39], 7);
        assert_eq!(frame.samples()[40], 0);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn utterance_concatenates_frames_in_order() {
        let start = Instant::now();
        let frames = vec![
            AudioFrame::new(vec![1, 2], start, 16000, 0),
            AudioFrame::new(vec![3, 4], start + Duration::from_micros(125), 16000, 1),
        ];
        let utterance = Utterance::new(9, frames, CloseReason::Hangover, 0);

        assert_eq!(utterance.samples(), vec![1, 2, 3, 4]);
        assert_eq!(utterance.start(), Some(start));
        assert_eq!(utterance.sample_rate(), 16000);
        assert_eq!(utterance.duration(), Duration::from_micros(250));
    }

    #[test]
    fn ms_to_samples_at_common_rates() {
        assert_eq!(ms_to_samples(20, 16000), 320);
        assert_eq!(ms_to_samples(95, 16000), 1520);
        assert_eq!(ms_to_samples(10, 48000), 480);
    }
}
