//! Prerecorded filler clips played while a reply is being generated.

use crate::audio::wav::decode_mono;
use crate::backend::Pcm;
use crate::error::{HaloError, Result};
use std::path::{Path, PathBuf};

/// Clips handed out in turn, wrapping around.
#[derive(Debug, Clone, PartialEq)]
pub struct FillerClips {
    clips: Vec<Pcm>,
    next: usize,
}

impl FillerClips {
    pub fn new(clips: Vec<Pcm>) -> Self {
        let clips = clips.into_iter().filter(|c| !c.samples.is_empty()).collect();
        Self { clips, next: 0 }
    }

    /// Load every `.wav` file directly inside `dir`, in file name order,
    /// converted to mono at `sample_rate`.
    pub fn load_dir(dir: &Path, sample_rate: u32) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| HaloError::Other(format!("cannot read filler directory {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            })
            .collect();
        paths.sort();

        let mut clips = Vec::with_capacity(paths.len());
        for path in &paths {
            let file = std::fs::File::open(path)?;
            let samples = decode_mono(Box::new(std::io::BufReader::new(file)), sample_rate)
                .map_err(|e| HaloError::Wav {
                    message: format!("{}: {e}", path.display()),
                })?;
            clips.push(Pcm::new(samples, sample_rate));
        }

        let clips = Self::new(clips);
        if clips.is_empty() {
            return Err(HaloError::ConfigInvalidValue {
                key: "playback.filler_dir".to_string(),
                message: format!("no .wav clips in {}", dir.display()),
            });
        }
        tracing::info!(clips = clips.len(), dir = %dir.display(), "filler clips loaded");
        Ok(clips)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn next_clip(&mut self) -> Option<Pcm> {
        let clip = self.clips.get(self.next % self.clips.len().max(1))?.clone();
        self.next = (self.next + 1) % self.clips.len();
        Some(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, rate: u32, value: i16, len: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..len {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_clips_rotate() {
        let mut clips = FillerClips::new(vec![
            Pcm::new(vec![1; 4], 16000),
            Pcm::new(vec![], 16000),
            Pcm::new(vec![2; 4], 16000),
        ]);
        assert_eq!(clips.len(), 2);
        assert_eq!(clips.next_clip().unwrap().samples[0], 1);
        assert_eq!(clips.next_clip().unwrap().samples[0], 2);
        assert_eq!(clips.next_clip().unwrap().samples[0], 1);
    }

    #[test]
    fn test_empty_set_has_no_clip() {
        let mut clips = FillerClips::new(Vec::new());
        assert!(clips.is_empty());
        assert!(clips.next_clip().is_none());
    }

    #[test]
    fn test_load_dir_reads_wavs_in_name_order() {
        let dir = TempDir::new().unwrap();
        write_wav(&dir.path().join("b.wav"), 16000, 200, 1600);
        write_wav(&dir.path().join("a.WAV"), 32000, 100, 3200);
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let mut clips = FillerClips::load_dir(dir.path(), 16000).unwrap();
        assert_eq!(clips.len(), 2);

        let first = clips.next_clip().unwrap();
        assert_eq!(first.sample_rate, 16000);
        assert_eq!(first.samples.len(), 1600);
        assert!(first.samples.iter().all(|&s| s == 100));
        assert!(clips.next_clip().unwrap().samples.iter().all(|&s| s == 200));
    }

    #[test]
    fn test_load_dir_without_clips_is_config_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            FillerClips::load_dir(dir.path(), 16000),
            Err(HaloError::ConfigInvalidValue { .. })
        ));
        assert!(FillerClips::load_dir(&dir.path().join("missing"), 16000).is_err());
    }
}
