//! Composition root: wires capture, playback and the session together.
//!
//! source → capture thread → capture station → session ← service jobs
//!                                               ↓
//!                      sink ← playback worker ← queue

use crate::audio::{AudioSink, AudioSource, Clock, SystemClock};
use crate::backend::Services;
use crate::config::Config;
use crate::conversation::{
    ConversationRuntime, RuntimeChannels, RuntimeConfig, Session, SessionSummary, StateObserver,
};
use crate::error::Result;
use crate::filters::QualityFilters;
use crate::gate::{CorrelationGate, LoopbackBuffer};
use crate::matcher::{Intent, IntentClassifier, MatcherSet};
use crate::pipeline::{
    CaptureConfig, CaptureStation, ErrorReporter, LogReporter, StationRunner, spawn_capture,
};
use crate::playback::{FillerClips, PlaybackQueue};
use crate::text::TextRewriter;
use crate::vad::{EnergyClassifier, VoiceClassifier};
use crossbeam_channel::{bounded, unbounded};
use std::sync::Arc;
use std::time::Duration;

/// Frames buffered between the capture thread and the capture station.
const FRAME_BUFFER: usize = 64;

/// A configured assistant, ready to run one session.
pub struct Assistant {
    config: Config,
    services: Services,
    matchers: MatcherSet,
    classifier: Option<Box<dyn VoiceClassifier>>,
    observers: Vec<Box<dyn StateObserver>>,
    filler: Option<FillerClips>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Assistant {
    /// Validate `config`, compile its matchers and load filler clips.
    pub fn new(config: Config, services: Services) -> Result<Self> {
        config.validate()?;
        let matchers = MatcherSet::from_config(&config.conversation)?;
        let filler = match (&config.playback.filler_dir, config.playback.use_filler) {
            (Some(dir), true) => Some(FillerClips::load_dir(dir, config.audio.sample_rate)?),
            _ => None,
        };
        Ok(Self {
            config,
            services,
            matchers,
            classifier: None,
            observers: Vec::new(),
            filler,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(LogReporter),
        })
    }

    /// Replace the default energy classifier.
    pub fn with_classifier(mut self, classifier: Box<dyn VoiceClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Add a model-backed detector next to the configured phrases.
    pub fn with_intent_classifier(
        mut self,
        intent: Intent,
        classifier: Arc<dyn IntentClassifier>,
        threshold: f32,
    ) -> Self {
        self.matchers = self.matchers.with_classifier(intent, classifier, threshold);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Play these clips while a reply is generated.
    pub fn with_filler_clips(mut self, clips: FillerClips) -> Self {
        self.filler = Some(clips);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run a session over `source` and `sink` until it terminates.
    ///
    /// Returns once every pipeline thread has stopped. Response jobs still
    /// waiting on the responder hold the playback queue open, so shutdown
    /// waits for them to return.
    pub fn run(self, source: Box<dyn AudioSource>, sink: Box<dyn AudioSink>) -> Result<SessionSummary> {
        let Assistant {
            config,
            services,
            matchers,
            classifier,
            observers,
            filler,
            clock,
            reporter,
        } = self;
        let sample_rate = config.audio.sample_rate;

        let loopback = config.gate.enabled.then(|| {
            Arc::new(LoopbackBuffer::new(
                sample_rate,
                Duration::from_millis(u64::from(config.gate.retention_ms)),
                clock.clone(),
            ))
        });

        let classifier: Box<dyn VoiceClassifier> = match classifier {
            Some(classifier) => classifier,
            None => Box::new(EnergyClassifier::new(config.vad.aggressiveness)),
        };
        let mut station = CaptureStation::new(classifier, config.segmenter());
        if let Some(loopback) = &loopback {
            station = station.with_gate(CorrelationGate::new(config.gate(), loopback.clone()));
        }

        let (frames_tx, frames_rx) = bounded(FRAME_BUFFER);
        let (capture_tx, capture_rx) = unbounded();
        let capture_runner = StationRunner::spawn(station, frames_rx, capture_tx, reporter.clone());

        let mut queue = PlaybackQueue::new(
            &config.playback(),
            sink,
            services.synthesizer.clone(),
            clock.clone(),
        );
        if let Some(loopback) = &loopback {
            queue = queue.with_loopback(loopback.clone());
        }
        let (playback_tx, playback_rx) = unbounded();
        let (producer, control, playback_runner) = queue.spawn(playback_tx, reporter);

        let capture = match spawn_capture(
            source,
            CaptureConfig {
                sample_rate,
                frame_len: config.frame_len(),
            },
            clock,
            frames_tx,
        ) {
            Ok(capture) => capture,
            Err(e) => {
                drop(producer);
                join_runner(capture_runner);
                join_runner(playback_runner);
                return Err(e);
            }
        };

        let rewriter = TextRewriter::new(
            &config.conversation.text_replacements,
            &config.conversation.assistant_name,
        );
        let mut session_config = config.session();
        session_config.filler = filler.as_ref().is_some_and(|clips| !clips.is_empty());
        let session = Session::new(
            session_config,
            QualityFilters::new(&config.filters()),
            matchers,
            rewriter.clone(),
        );
        let runtime_config = RuntimeConfig {
            max_len: config.playback.max_len,
            presynthesize: config.playback.presynthesize,
            voice: config.playback().voice,
        };
        let mut runtime = ConversationRuntime::new(session, services, runtime_config, rewriter);
        for observer in observers {
            runtime = runtime.with_observer(observer);
        }
        if let Some(clips) = filler {
            runtime = runtime.with_filler(clips);
        }

        let result = runtime.run(RuntimeChannels {
            capture: capture_rx,
            playback: playback_rx,
            producer,
            control,
        });

        capture.stop();
        let dropped = capture.dropped_frames();
        if dropped > 0 {
            tracing::info!(dropped, "frames dropped during session");
        }
        if let Err(e) = capture.join() {
            tracing::error!(error = %e, "capture thread failed");
        }
        join_runner(capture_runner);
        join_runner(playback_runner);

        result
    }
}

fn join_runner<S: crate::pipeline::Station>(runner: StationRunner<S>) {
    let name = runner.name();
    if let Err(e) = runner.join() {
        tracing::error!(station = name, error = %e, "station thread failed");
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("sample_rate", &self.config.audio.sample_rate)
            .field("gate", &self.config.gate.enabled)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

