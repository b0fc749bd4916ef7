//! Streaming playback queue.
//!
//! Response jobs enqueue sentences through a [`PlaybackProducer`]; a single
//! [`PlaybackStation`] plays them in sequence order and feeds the loopback
//! buffer; [`PlaybackControl::cancel`] cuts everything off for barge-in.
//! Filler clips share the queue and stop with [`PlaybackControl::stop_filler`].

pub mod filler;
pub mod queue;
pub mod worker;

use crate::audio::{AudioSink, Clock};
use crate::backend::{Synthesizer, VoiceParams};
use crate::defaults;
use crate::gate::LoopbackBuffer;
use crate::pipeline::{ErrorReporter, StationRunner};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

pub use filler::FillerClips;
pub use queue::{PlaybackControl, PlaybackItem, PlaybackProducer};
pub use worker::PlaybackStation;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    pub queue_size: usize,
    pub block_ms: u32,
    pub voice: VoiceParams,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_size: defaults::QUEUE_SIZE,
            block_ms: defaults::PLAYBACK_BLOCK_MS,
            voice: VoiceParams::default(),
        }
    }
}

/// Outcome of one queued item.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Finished { turn: u64, seq: u64 },
    /// Discarded or cut short by a cancellation.
    Cancelled { turn: u64, seq: u64 },
    /// Synthesis failed; nothing was played.
    Failed { turn: u64, seq: u64, error: String },
    /// The output device rejected a write.
    DeviceFailed(String),
}

/// A queue and its not-yet-running worker.
pub struct PlaybackQueue {
    pub producer: PlaybackProducer,
    pub control: PlaybackControl,
    pub worker: PlaybackStation,
    pub items: Receiver<PlaybackItem>,
}

impl PlaybackQueue {
    pub fn new(
        config: &PlaybackConfig,
        sink: Box<dyn AudioSink>,
        synthesizer: Arc<dyn Synthesizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (producer, control, items) = queue::channel(config.queue_size);
        let worker = PlaybackStation::new(
            sink,
            synthesizer,
            config.voice.clone(),
            config.block_ms,
            clock,
            control.shared(),
        );
        Self {
            producer,
            control,
            worker,
            items,
        }
    }

    pub fn with_loopback(mut self, loopback: Arc<LoopbackBuffer>) -> Self {
        self.worker = self.worker.with_loopback(loopback);
        self
    }

    /// Start the worker thread, reporting outcomes on `events`.
    pub fn spawn(
        self,
        events: Sender<PlaybackEvent>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> (PlaybackProducer, PlaybackControl, StationRunner<PlaybackStation>) {
        let runner = StationRunner::spawn(self.worker, self.items, events, reporter);
        (self.producer, self.control, runner)
    }
}
