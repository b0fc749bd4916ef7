//! Offline analysis of WAV recordings written with hound.

use halo_voice::Config;
use halo_voice::analysis::{LoopbackTrack, analyze};
use halo_voice::audio::CloseReason;
use halo_voice::audio::wav::WavAudioSource;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn tone(ms: usize, freq: f32, amplitude: f32, sample_rate: u32) -> Vec<i16> {
    (0..ms * sample_rate as usize / 1000)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
        })
        .collect()
}

fn sweep(ms: usize, sample_rate: u32) -> Vec<i16> {
    (0..ms * sample_rate as usize / 1000)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let freq = 250.0 + 700.0 * t;
            (12000.0 * (2.0 * std::f32::consts::PI * freq * t).sin()) as i16
        })
        .collect()
}

fn silence(ms: usize, sample_rate: u32) -> Vec<i16> {
    vec![0; ms * sample_rate as usize / 1000]
}

fn load(path: &Path) -> Vec<i16> {
    WavAudioSource::from_path(path, 16000).unwrap().into_samples()
}

#[test]
fn stereo_48k_recording_yields_two_utterances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mic.wav");

    let mut samples = silence(400, 48000);
    samples.extend(tone(800, 200.0, 9000.0, 48000));
    samples.extend(silence(1000, 48000));
    samples.extend(tone(600, 300.0, 9000.0, 48000));
    samples.extend(silence(1000, 48000));
    write_wav(&path, &samples, 48000, 2);

    let mic = load(&path);
    assert_eq!(mic.len(), 3800 * 16);

    let report = analyze(&Config::default(), &mic, None).unwrap();
    assert_eq!(report.utterances.len(), 2);
    assert!(
        report
            .utterances
            .iter()
            .all(|u| u.close_reason == CloseReason::Hangover)
    );
    assert!(report.utterances[0].start < report.utterances[1].start);
    assert_eq!(report.utterances[0].id + 1, report.utterances[1].id);
    assert_eq!(report.stats.gated_frames, 0);
}

#[test]
fn long_speech_is_split_at_the_maximum_length() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("long.wav");
    write_wav(&path, &tone(2500, 200.0, 9000.0, 16000), 16000, 1);

    let mut config = Config::default();
    config.vad.max_utterance_ms = 1000;
    let report = analyze(&config, &load(&path), None).unwrap();

    assert!(report.utterances.len() >= 2);
    assert_eq!(report.utterances[0].close_reason, CloseReason::MaxLength);
    assert_eq!(report.utterances[0].frames, 50);
}

#[test]
fn echo_of_played_audio_is_gated_but_live_speech_is_not() {
    let dir = TempDir::new().unwrap();
    let mic_path = dir.path().join("mic.wav");
    let played_path = dir.path().join("played.wav");

    // The assistant speaks from 500ms; the microphone hears it 30ms later
    // at a third of the volume. At 2500ms the user speaks over silence.
    let played = sweep(1000, 16000);
    let mut mic = silence(530, 16000);
    mic.extend(played.iter().map(|s| s / 3));
    mic.extend(silence(970, 16000));
    mic.extend(tone(800, 180.0, 9000.0, 16000));
    mic.extend(silence(1000, 16000));
    write_wav(&mic_path, &mic, 16000, 1);
    write_wav(&played_path, &played, 16000, 1);

    let report = analyze(
        &Config::default(),
        &load(&mic_path),
        Some(LoopbackTrack {
            samples: load(&played_path),
            delay: Duration::from_millis(500),
        }),
    )
    .unwrap();

    assert!(report.stats.gated_frames >= 40, "stats: {:?}", report.stats);
    assert_eq!(report.utterances.len(), 1);
    let utterance = &report.utterances[0];
    assert!(utterance.start >= Duration::from_millis(2300));
    assert_eq!(utterance.gated_frames, 0);
}

#[test]
fn missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(WavAudioSource::from_path(&dir.path().join("absent.wav"), 16000).is_err());
}
