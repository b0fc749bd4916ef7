//! Ordered, bounded hand-off of sentences to the playback worker.

use crate::backend::Pcm;
use crate::error::{HaloError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One sentence waiting to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    pub seq: u64,
    pub turn: u64,
    /// Cancellation generation current when the item was queued.
    pub generation: u64,
    pub text: String,
    /// Presynthesized audio; the worker synthesizes when absent.
    pub pcm: Option<Pcm>,
    /// Filler epoch for filler clips, `None` for sentences.
    pub filler: Option<u64>,
}

/// State shared by producers, the control handle and the worker.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    generation: AtomicU64,
    filler_epoch: AtomicU64,
    /// Held by the worker for each block write and by `cancel` after the bump.
    write_lock: Mutex<()>,
}

impl Shared {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn filler_epoch(&self) -> u64 {
        self.filler_epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Creates the channel between producers and the worker.
pub(crate) fn channel(queue_size: usize) -> (PlaybackProducer, PlaybackControl, Receiver<PlaybackItem>) {
    let (tx, rx) = bounded(queue_size.max(1));
    let shared = Arc::new(Shared::default());
    let producer = PlaybackProducer {
        tx,
        next_seq: Arc::new(Mutex::new(0)),
        shared: shared.clone(),
    };
    (producer, PlaybackControl { shared }, rx)
}

/// Enqueues sentences. Clones share one sequence counter.
#[derive(Debug, Clone)]
pub struct PlaybackProducer {
    tx: Sender<PlaybackItem>,
    next_seq: Arc<Mutex<u64>>,
    shared: Arc<Shared>,
}

impl PlaybackProducer {
    /// Queue `text` for `turn` and return its sequence number.
    ///
    /// Blocks while the queue is full. The sequence lock is held across the
    /// send, so items enter the channel in sequence order even with several
    /// producers.
    pub fn enqueue(&self, turn: u64, text: impl Into<String>, pcm: Option<Pcm>) -> Result<u64> {
        self.enqueue_in(self.shared.generation(), turn, text, pcm)
    }

    /// Queue under a generation captured earlier.
    ///
    /// A job that outlives a cancellation keeps stamping its old generation,
    /// so whatever it still queues is discarded unplayed.
    pub fn enqueue_in(
        &self,
        generation: u64,
        turn: u64,
        text: impl Into<String>,
        pcm: Option<Pcm>,
    ) -> Result<u64> {
        let mut next_seq = match self.next_seq.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let seq = *next_seq;
        let item = PlaybackItem {
            seq,
            turn,
            generation,
            text: text.into(),
            pcm,
            filler: None,
        };
        self.tx.send(item).map_err(|_| HaloError::SessionClosed)?;
        *next_seq += 1;
        tracing::debug!(turn, seq, queued = self.tx.len(), "sentence queued");
        Ok(seq)
    }

    /// Queue a filler clip for `turn` unless that would block.
    ///
    /// Returns `None` when the queue is full or another producer is mid-send.
    /// Fillers report no playback events.
    pub fn try_enqueue_filler(&self, turn: u64, pcm: Pcm) -> Option<u64> {
        let mut next_seq = self.next_seq.try_lock().ok()?;
        let seq = *next_seq;
        let item = PlaybackItem {
            seq,
            turn,
            generation: self.shared.generation(),
            text: String::new(),
            pcm: Some(pcm),
            filler: Some(self.shared.filler_epoch()),
        };
        match self.tx.try_send(item) {
            Ok(()) => {
                *next_seq += 1;
                tracing::debug!(turn, seq, "filler queued");
                Some(seq)
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(turn, "playback queue full, filler skipped");
                None
            }
            Err(TrySendError::Disconnected(_)) => None,
        }
    }

    /// Current cancellation generation.
    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    /// Items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Cancels playback.
#[derive(Debug, Clone)]
pub struct PlaybackControl {
    shared: Arc<Shared>,
}

impl PlaybackControl {
    /// Discard everything queued so far and stop the item in flight.
    ///
    /// When this returns the worker has finished any block write in progress
    /// and will not write another block of a cancelled item. The wait is
    /// bounded by one `AudioSink::write`; waiting for device room happens
    /// outside it.
    pub fn cancel(&self) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(self.shared.lock_writes());
        tracing::debug!(generation, "playback cancelled");
        generation
    }

    /// Stop any filler clip, queued or playing, leaving sentences alone.
    ///
    /// Returns once no further block of a filler queued before the call will
    /// be written.
    pub fn stop_filler(&self) {
        let epoch = self.shared.filler_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        drop(self.shared.lock_writes());
        tracing::debug!(epoch, "filler stopped");
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }
}
