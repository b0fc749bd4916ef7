//! Utterance boundaries from per-frame speech decisions.

use crate::audio::{AudioFrame, CloseReason, Utterance};
use crate::defaults;
use std::collections::VecDeque;
use std::time::Instant;

/// How a frame counts toward segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Speech,
    NonSpeech,
    /// Speech-like but matched recent playback; counts as non-speech.
    Loopback,
}

impl FrameKind {
    pub fn is_speech(self) -> bool {
        matches!(self, FrameKind::Speech)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Consecutive speech frames needed to open an utterance.
    pub min_consecutive_speech_frames: u32,
    /// Consecutive non-speech frames that close it.
    pub hangover_frames: u32,
    /// Frames from before the debounce run kept as lead-in context.
    pub pre_roll_frames: u32,
    /// Force-close after this many frames.
    pub max_frames: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_consecutive_speech_frames: defaults::MIN_CONSECUTIVE_SPEECH_FRAMES,
            hangover_frames: defaults::HANGOVER_FRAMES,
            pre_roll_frames: defaults::PRE_ROLL_FRAMES,
            max_frames: defaults::MAX_UTTERANCE_MS / defaults::FRAME_DURATION_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// The debounce run completed and an utterance is now open.
    SpeechStarted { utterance_id: u64, at: Instant },
    /// The open utterance closed.
    Closed(Utterance),
}

#[derive(Debug)]
struct OpenUtterance {
    id: u64,
    frames: Vec<AudioFrame>,
    silence_run: u32,
    gated: u32,
}

/// Debounced speech segmenter.
///
/// At most one utterance is open at a time.
#[derive(Debug)]
pub struct Segmenter {
    config: SegmenterConfig,
    pre_roll: VecDeque<AudioFrame>,
    run: Vec<AudioFrame>,
    open: Option<OpenUtterance>,
    next_id: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config: SegmenterConfig {
                min_consecutive_speech_frames: config.min_consecutive_speech_frames.max(1),
                hangover_frames: config.hangover_frames.max(1),
                pre_roll_frames: config.pre_roll_frames,
                max_frames: config.max_frames.max(1),
            },
            pre_roll: VecDeque::with_capacity(config.pre_roll_frames as usize + 1),
            run: Vec::with_capacity(config.min_consecutive_speech_frames as usize),
            open: None,
            next_id: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Length of the current consecutive speech run before opening.
    pub fn speech_run(&self) -> usize {
        self.run.len()
    }

    pub fn push(&mut self, frame: AudioFrame, kind: FrameKind) -> Option<SegmentEvent> {
        if let Some(open) = self.open.as_mut() {
            open.frames.push(frame);
            if kind.is_speech() {
                open.silence_run = 0;
            } else {
                open.silence_run += 1;
                if kind == FrameKind::Loopback {
                    open.gated += 1;
                }
            }

            let reason = if open.silence_run >= self.config.hangover_frames {
                Some(CloseReason::Hangover)
            } else if open.frames.len() >= self.config.max_frames as usize {
                Some(CloseReason::MaxLength)
            } else {
                None
            };
            return reason.and_then(|reason| self.close(reason));
        }

        if !kind.is_speech() {
            // An interrupted run becomes context, not speech.
            self.pre_roll.extend(self.run.drain(..));
            self.pre_roll.push_back(frame);
            while self.pre_roll.len() > self.config.pre_roll_frames as usize {
                self.pre_roll.pop_front();
            }
            return None;
        }

        self.run.push(frame);
        if self.run.len() < self.config.min_consecutive_speech_frames as usize {
            return None;
        }

        let at = self.run[0].timestamp();
        let mut frames: Vec<AudioFrame> = self.pre_roll.drain(..).collect();
        frames.append(&mut self.run);
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(utterance_id = id, lead_in = frames.len(), "speech started");
        self.open = Some(OpenUtterance {
            id,
            frames,
            silence_run: 0,
            gated: 0,
        });
        Some(SegmentEvent::SpeechStarted {
            utterance_id: id,
            at,
        })
    }

    /// Force-close an open utterance at end of input.
    pub fn finish(&mut self) -> Option<SegmentEvent> {
        self.run.clear();
        self.pre_roll.clear();
        if self.open.is_some() {
            self.close(CloseReason::EndOfInput)
        } else {
            None
        }
    }

    fn close(&mut self, reason: CloseReason) -> Option<SegmentEvent> {
        let open = self.open.take()?;
        tracing::debug!(
            utterance_id = open.id,
            frames = open.frames.len(),
            gated = open.gated,
            ?reason,
            "utterance closed"
        );
        Some(SegmentEvent::Closed(Utterance::new(
            open.id,
            open.frames,
            reason,
            open.gated,
        )))
    }
}
