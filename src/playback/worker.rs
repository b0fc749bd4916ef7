//! The single playback worker: sole writer of the sink and the loopback buffer.
//!
//! Filler clips go through the same path, so the gate hears them too.

use crate::audio::frame::{ms_to_samples, samples_to_duration};
use crate::audio::wav::resample;
use crate::audio::{AudioSink, Clock};
use crate::backend::{Synthesizer, VoiceParams};
use crate::gate::LoopbackBuffer;
use crate::pipeline::{Station, StationError};
use crate::playback::queue::{PlaybackItem, Shared};
use crate::playback::PlaybackEvent;
use std::sync::Arc;
use std::time::Instant;

enum Outcome {
    Finished,
    Cancelled,
    DeviceFailed(String),
}

/// Plays queued items in order, block by block.
///
/// Before writing each block to the sink, the block is appended to the
/// loopback buffer with its playback time. Consecutive blocks are timed back
/// to back, and an item starts no earlier than the end of the previous one.
pub struct PlaybackStation {
    sink: Box<dyn AudioSink>,
    synthesizer: Arc<dyn Synthesizer>,
    voice: VoiceParams,
    block_ms: u32,
    loopback: Option<Arc<LoopbackBuffer>>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    playhead: Option<Instant>,
}

impl PlaybackStation {
    pub(crate) fn new(
        sink: Box<dyn AudioSink>,
        synthesizer: Arc<dyn Synthesizer>,
        voice: VoiceParams,
        block_ms: u32,
        clock: Arc<dyn Clock>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            sink,
            synthesizer,
            voice,
            block_ms: block_ms.max(1),
            loopback: None,
            clock,
            shared,
            playhead: None,
        }
    }

    pub fn with_loopback(mut self, loopback: Arc<LoopbackBuffer>) -> Self {
        self.loopback = Some(loopback);
        self
    }

    fn is_stale(&self, item: &PlaybackItem) -> bool {
        item.generation != self.shared.generation()
            || item
                .filler
                .is_some_and(|epoch| epoch != self.shared.filler_epoch())
    }

    /// Fillers are fire-and-forget: only a device failure is reported.
    fn play_filler(&mut self, item: &PlaybackItem) -> Option<PlaybackEvent> {
        let pcm = item.pcm.as_ref()?;
        match self.play(item, &pcm.samples, pcm.sample_rate) {
            Outcome::Finished => {
                tracing::debug!(turn = item.turn, seq = item.seq, "filler finished");
                None
            }
            Outcome::Cancelled => {
                tracing::debug!(turn = item.turn, seq = item.seq, "filler cut off");
                None
            }
            Outcome::DeviceFailed(message) => {
                tracing::error!(error = %message, "audio output failed during filler");
                Some(PlaybackEvent::DeviceFailed(message))
            }
        }
    }

    fn play(&mut self, item: &PlaybackItem, samples: &[i16], rate: u32) -> Outcome {
        let sink_rate = self.sink.sample_rate();
        let sink_pcm = resample(samples, rate, sink_rate);
        let loopback_pcm = self
            .loopback
            .as_ref()
            .map(|lb| resample(samples, rate, lb.sample_rate()));

        let block_len = ms_to_samples(self.block_ms, sink_rate).max(1);
        let now = self.clock.now();
        let mut play_at = match self.playhead {
            Some(end) if end > now => end,
            _ => now,
        };

        for (index, block) in sink_pcm.chunks(block_len).enumerate() {
            if let Err(e) = self.sink.wait_ready() {
                return Outcome::DeviceFailed(e.to_string());
            }
            let _writing = self.shared.lock_writes();
            if self.is_stale(item) {
                if let Err(e) = self.sink.stop() {
                    tracing::warn!(error = %e, "failed to stop sink");
                }
                self.playhead = None;
                return Outcome::Cancelled;
            }

            if let (Some(loopback), Some(pcm)) = (&self.loopback, &loopback_pcm) {
                let start = index * block_len;
                let end = start + block.len();
                let scale = |i: usize| i * pcm.len() / sink_pcm.len().max(1);
                loopback.append(play_at, &pcm[scale(start)..scale(end)]);
            }

            if let Err(e) = self.sink.write(block) {
                return Outcome::DeviceFailed(e.to_string());
            }
            play_at += samples_to_duration(block.len(), sink_rate);
            self.playhead = Some(play_at);
        }

        if let Err(e) = self.sink.drain() {
            return Outcome::DeviceFailed(e.to_string());
        }
        Outcome::Finished
    }
}

impl Station for PlaybackStation {
    type Input = PlaybackItem;
    type Output = PlaybackEvent;

    fn process(&mut self, item: PlaybackItem) -> Result<Option<PlaybackEvent>, StationError> {
        let (turn, seq) = (item.turn, item.seq);
        if item.filler.is_some() {
            if self.is_stale(&item) {
                return Ok(None);
            }
            return Ok(self.play_filler(&item));
        }
        if self.is_stale(&item) {
            tracing::debug!(turn, seq, "discarding cancelled item");
            return Ok(Some(PlaybackEvent::Cancelled { turn, seq }));
        }

        let pcm = match &item.pcm {
            Some(pcm) => pcm.clone(),
            None => match self.synthesizer.synthesize(&item.text, &self.voice) {
                Ok(pcm) => pcm,
                Err(e) => {
                    tracing::warn!(turn, seq, error = %e, "synthesis failed");
                    return Ok(Some(PlaybackEvent::Failed {
                        turn,
                        seq,
                        error: e.to_string(),
                    }));
                }
            },
        };

        tracing::debug!(turn, seq, duration_ms = pcm.duration().as_millis() as u64, "playing");
        let event = match self.play(&item, &pcm.samples, pcm.sample_rate) {
            Outcome::Finished => PlaybackEvent::Finished { turn, seq },
            Outcome::Cancelled => PlaybackEvent::Cancelled { turn, seq },
            Outcome::DeviceFailed(message) => {
                tracing::error!(turn, seq, error = %message, "audio output failed");
                PlaybackEvent::DeviceFailed(message)
            }
        };
        Ok(Some(event))
    }

    fn name(&self) -> &'static str {
        "playback"
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.sink.stop() {
            tracing::warn!(error = %e, "failed to stop sink on shutdown");
        }
    }
}
