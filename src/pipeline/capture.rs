//! Capture thread: audio source to timestamped frames.

use crate::audio::wav::Resampler;
use crate::audio::{AudioSource, Clock, FrameAssembler};
use crate::error::{HaloError, Result};
use crate::pipeline::capture_station::CaptureInput;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(16);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Rate the rest of the pipeline runs at.
    pub sample_rate: u32,
    pub frame_len: usize,
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Ask the thread to stop; it closes the frame channel on exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames discarded because the capture station fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn join(mut self) -> std::result::Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| "capture thread panicked".to_string()),
            None => Ok(()),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start `source` and spawn the thread that frames its samples.
///
/// Frame timestamps are derived from the sample count since the first read,
/// so they stay sample-accurate regardless of polling jitter. Live sources
/// drop frames when the station is behind; finite sources block instead, so
/// a file is never truncated.
pub fn spawn_capture(
    mut source: Box<dyn AudioSource>,
    config: CaptureConfig,
    clock: Arc<dyn Clock>,
    frames_tx: Sender<CaptureInput>,
) -> Result<CaptureHandle> {
    source.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let dropped = Arc::new(AtomicU64::new(0));
    let thread_running = running.clone();
    let thread_dropped = dropped.clone();

    let handle = thread::Builder::new()
        .name("halo-capture".to_string())
        .spawn(move || {
            run_capture(
                source.as_mut(),
                config,
                clock.as_ref(),
                &frames_tx,
                &thread_running,
                &thread_dropped,
            );
            if let Err(e) = source.stop() {
                tracing::warn!(error = %e, "failed to stop audio capture");
            }
            thread_running.store(false, Ordering::SeqCst);
        })
        .map_err(|e| HaloError::AudioDevice {
            message: format!("failed to spawn capture thread: {e}"),
        })?;

    Ok(CaptureHandle {
        running,
        dropped,
        handle: Some(handle),
    })
}

fn run_capture(
    source: &mut dyn AudioSource,
    config: CaptureConfig,
    clock: &dyn Clock,
    frames_tx: &Sender<CaptureInput>,
    running: &AtomicBool,
    dropped: &AtomicU64,
) {
    let finite = source.is_finite();
    let source_rate = source.sample_rate();
    if source_rate != config.sample_rate {
        tracing::info!(
            from = source_rate,
            to = config.sample_rate,
            "resampling capture input"
        );
    }

    let mut resampler = Resampler::new(source_rate, config.sample_rate);
    let mut assembler: Option<FrameAssembler> = None;
    let mut consecutive_errors: u32 = 0;
    let mut frames_sent: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let samples = match source.read_samples() {
            Ok(samples) => {
                consecutive_errors = 0;
                samples
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!(
                        errors = consecutive_errors,
                        error = %e,
                        "audio capture failed repeatedly"
                    );
                    if frames_tx
                        .send(CaptureInput::DeviceFailed(e.to_string()))
                        .is_err()
                    {
                        tracing::debug!("capture station already gone");
                    }
                    return;
                }
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        if samples.is_empty() {
            if finite {
                break;
            }
            // Devices deliver nothing while they warm up.
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        let samples = resampler.process(&samples);
        let assembler = assembler.get_or_insert_with(|| {
            FrameAssembler::new(config.frame_len, config.sample_rate, clock.now())
        });

        for frame in assembler.push(&samples) {
            if !deliver(frames_tx, CaptureInput::Frame(frame), finite, dropped) {
                return;
            }
            frames_sent += 1;
        }

        if !finite {
            thread::sleep(POLL_INTERVAL);
        }
    }

    if finite
        && let Some(frame) = assembler.as_mut().and_then(FrameAssembler::flush)
        && deliver(frames_tx, CaptureInput::Frame(frame), finite, dropped)
    {
        frames_sent += 1;
    }

    if frames_sent == 0 && !finite {
        tracing::warn!("no audio frames captured; check that the microphone is connected");
    }
    tracing::debug!(
        frames = frames_sent,
        dropped = dropped.load(Ordering::Relaxed),
        "capture stopped"
    );
}

/// Returns false once the station is gone.
fn deliver(tx: &Sender<CaptureInput>, input: CaptureInput, finite: bool, dropped: &AtomicU64) -> bool {
    if finite {
        return tx.send(input).is_ok();
    }
    match tx.try_send(input) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                tracing::warn!(dropped = total, "capture station behind, dropping frames");
            }
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}
