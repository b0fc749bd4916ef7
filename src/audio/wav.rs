//! WAV file audio source for offline analysis.

use crate::audio::source::AudioSource;
use crate::error::{HaloError, Result};
use std::io::Read;
use std::path::Path;

/// Audio source that reads from WAV file data.
/// Supports arbitrary sample rates and channels, resampling to the target rate in mono.
pub struct WavAudioSource {
    samples: Vec<i16>,
    position: usize,
    chunk_size: usize,
    sample_rate: u32,
}

impl WavAudioSource {
    /// Create from any reader.
    pub fn from_reader(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Self> {
        let samples = decode_mono(reader, target_rate)?;

        // 100ms reads
        let chunk_size = (target_rate as usize / 10).max(1);

        Ok(Self {
            samples,
            position: 0,
            chunk_size,
            sample_rate: target_rate,
        })
    }

    pub fn from_path(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), target_rate)
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }

        let end = std::cmp::min(self.position + self.chunk_size, self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Decode a 16-bit WAV stream to mono at `target_rate`.
pub fn decode_mono(reader: Box<dyn Read + Send>, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| HaloError::Wav {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let source_rate = spec.sample_rate;
    let source_channels = spec.channels.max(1) as usize;

    let raw_samples: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| HaloError::Wav {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let mono_samples = downmix(&raw_samples, source_channels);

    Ok(resample(&mono_samples, source_rate, target_rate))
}

/// Average interleaved channels into mono.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Linear interpolation resampler for chunked streams.
///
/// Output sample `n` is read at input position `n * from / to` counted from
/// the first sample ever pushed, so splitting the input into chunks yields
/// the same stream as one call over the whole of it and the output length
/// never drifts from the input duration. A sample is emitted once its right
/// neighbour has arrived.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u64,
    to_rate: u64,
    /// Index of the next output sample.
    produced: u64,
    /// Input samples received before the current chunk.
    consumed: u64,
    /// Last sample of the previous chunk.
    last: Option<i16>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: u64::from(from_rate.max(1)),
            to_rate: u64::from(to_rate.max(1)),
            produced: 0,
            consumed: 0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn process(&mut self, chunk: &[i16]) -> Vec<i16> {
        if self.is_passthrough() || chunk.is_empty() {
            return chunk.to_vec();
        }

        let consumed = self.consumed;
        let last = self.last.unwrap_or(chunk[0]);
        let end = consumed + chunk.len() as u64;
        let sample_at = |index: u64| -> f64 {
            if index < consumed {
                f64::from(last)
            } else {
                f64::from(chunk[(index - consumed) as usize])
            }
        };

        let mut out = Vec::with_capacity(
            (chunk.len() as u64 * self.to_rate / self.from_rate + 1) as usize,
        );
        loop {
            let position = self.produced * self.from_rate;
            let index = position / self.to_rate;
            if index + 1 >= end {
                break;
            }
            let fraction = (position % self.to_rate) as f64 / self.to_rate as f64;
            let left = sample_at(index);
            let right = sample_at(index + 1);
            out.push((left + (right - left) * fraction) as i16);
            self.produced += 1;
        }

        self.consumed = end;
        self.last = chunk.last().copied();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn from_reader_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)), 16000).unwrap();

        assert_eq!(source.samples, input_samples);
        assert_eq!(source.chunk_size, 1600);
        assert!(source.is_finite());
    }

    #[test]
    fn from_reader_stereo_downmixes_to_mono() {
        let stereo_samples = vec![100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)), 16000).unwrap();

        assert_eq!(source.samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn from_reader_48khz_resamples_to_16khz() {
        let input_samples = vec![0i16; 48000];
        let wav_data = make_wav_data(48000, 1, &input_samples);

        let source = WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)), 16000).unwrap();

        assert!(source.samples.len() >= 15900 && source.samples.len() <= 16100);
    }

    #[test]
    fn read_samples_walks_file_then_returns_empty() {
        let input_samples = vec![1i16; 2000];
        let wav_data = make_wav_data(16000, 1, &input_samples);
        let mut source =
            WavAudioSource::from_reader(Box::new(Cursor::new(wav_data)), 16000).unwrap();

        assert_eq!(source.read_samples().unwrap().len(), 1600);
        assert_eq!(source.read_samples().unwrap().len(), 400);
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn from_reader_rejects_garbage() {
        let result = WavAudioSource::from_reader(Box::new(Cursor::new(vec![1u8, 2, 3])), 16000);
        assert!(matches!(result, Err(HaloError::Wav { .. })));
    }

    #[test]
    fn resample_keeps_constant_signal() {
        let resampled = resample(&[1000i16; 24000], 24000, 16000);
        assert_eq!(resampled.len(), 16000);
        assert!(resampled.iter().all(|&s| s == 1000));
    }

    #[test]
    fn resampler_chunks_match_duration() {
        // 60 s at 44.1 kHz in odd-sized device callbacks.
        let mut resampler = Resampler::new(44100, 16000);
        let mut input = 0u64;
        let mut output = 0u64;
        while input < 44100 * 60 {
            let chunk = vec![500i16; 512];
            input += chunk.len() as u64;
            output += resampler.process(&chunk).len() as u64;
        }

        let expected = input * 16000 / 44100;
        assert!(expected.abs_diff(output) <= 1, "expected {expected}, got {output}");
    }

    #[test]
    fn resampler_chunked_equals_whole() {
        let signal: Vec<i16> = (0..4800).map(|i| ((i * 37) % 2000) as i16 - 1000).collect();

        let mut whole = Resampler::new(48000, 16000);
        let expected = whole.process(&signal);

        let mut chunked = Resampler::new(48000, 16000);
        let mut actual = Vec::new();
        for chunk in signal.chunks(441) {
            actual.extend(chunked.process(chunk));
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn resampler_same_rate_passes_through() {
        let mut resampler = Resampler::new(16000, 16000);
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.process(&[4, 5, 6]), vec![4, 5, 6]);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        assert_eq!(resample(&[1, 2, 3], 16000, 16000), vec![1, 2, 3]);
    }
}
