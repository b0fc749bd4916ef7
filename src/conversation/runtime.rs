//! Threaded driver for [`Session`].
//!
//! The calling thread owns the session and multiplexes capture, playback
//! and service events with `select!`. Recognitions and responses run on job
//! threads that report back over an unbounded channel, so a slow backend
//! never stalls the session thread. Response jobs are the playback
//! producers.

use crate::backend::{Services, Synthesizer, TextStream, VoiceParams};
use crate::conversation::history::ConversationTurn;
use crate::conversation::observer::StateObserver;
use crate::conversation::session::{Action, Session, SessionEvent, Termination};
use crate::defaults;
use crate::error::{BackendError, HaloError, Result};
use crate::pipeline::CaptureEvent;
use crate::playback::{FillerClips, PlaybackControl, PlaybackEvent, PlaybackProducer};
use crate::text::{SentenceSplitter, TextRewriter};
use crossbeam_channel::{Receiver, RecvError, Sender, never, select, unbounded};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Longest span handed to the synthesizer.
    pub max_len: usize,
    /// Synthesize on the response job before queueing, overlapping synthesis
    /// of one sentence with playback of the previous one.
    pub presynthesize: bool,
    pub voice: VoiceParams,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_len: defaults::MAX_SENTENCE_CHARS,
            presynthesize: true,
            voice: VoiceParams::default(),
        }
    }
}

/// The runtime's inputs and its handles on the playback queue.
pub struct RuntimeChannels {
    pub capture: Receiver<CaptureEvent>,
    pub playback: Receiver<PlaybackEvent>,
    pub producer: PlaybackProducer,
    pub control: PlaybackControl,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub termination: Termination,
    /// Retained history at the end.
    pub history: Vec<ConversationTurn>,
    pub turns: u64,
}

impl From<CaptureEvent> for SessionEvent {
    fn from(event: CaptureEvent) -> Self {
        match event {
            CaptureEvent::SpeechStarted { utterance_id, .. } => {
                SessionEvent::SpeechStarted { utterance_id }
            }
            CaptureEvent::UtteranceReady(utterance) => SessionEvent::UtteranceClosed(utterance),
            CaptureEvent::DeviceFailed(message) => SessionEvent::DeviceFailed(message),
        }
    }
}

enum Incoming {
    Capture(std::result::Result<CaptureEvent, RecvError>),
    Service(std::result::Result<SessionEvent, RecvError>),
    Playback(std::result::Result<PlaybackEvent, RecvError>),
}

pub struct ConversationRuntime {
    session: Session,
    services: Services,
    config: RuntimeConfig,
    rewriter: TextRewriter,
    observers: Vec<Box<dyn StateObserver>>,
    filler: Option<FillerClips>,
}

impl ConversationRuntime {
    /// `rewriter` strips the assistant's label from response sentences.
    pub fn new(
        session: Session,
        services: Services,
        config: RuntimeConfig,
        rewriter: TextRewriter,
    ) -> Self {
        Self {
            session,
            services,
            config,
            rewriter,
            observers: Vec::new(),
            filler: None,
        }
    }

    /// Clips for `Action::PlayFiller`; without them the action is ignored.
    pub fn with_filler(mut self, clips: FillerClips) -> Self {
        self.filler = Some(clips);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn StateObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Run until the session terminates.
    ///
    /// A closed capture channel is end of input; a closed playback channel is
    /// a device failure. Only device failures are returned as errors.
    pub fn run(mut self, channels: RuntimeChannels) -> Result<SessionSummary> {
        let RuntimeChannels {
            mut capture,
            mut playback,
            producer,
            control,
        } = channels;
        let (service_tx, service_rx) = unbounded::<SessionEvent>();

        tracing::info!(state = %self.session.state(), "session started");

        let termination = loop {
            let incoming = select! {
                recv(capture) -> msg => Incoming::Capture(msg),
                recv(service_rx) -> msg => Incoming::Service(msg),
                recv(playback) -> msg => Incoming::Playback(msg),
            };
            let event = match incoming {
                Incoming::Capture(Ok(event)) => SessionEvent::from(event),
                Incoming::Capture(Err(_)) => {
                    capture = never();
                    SessionEvent::InputEnded
                }
                Incoming::Service(Ok(event)) => event,
                // The sender lives on this thread.
                Incoming::Service(Err(_)) => continue,
                Incoming::Playback(Ok(event)) => SessionEvent::Playback(event),
                Incoming::Playback(Err(_)) => {
                    playback = never();
                    SessionEvent::DeviceFailed("playback worker stopped".to_string())
                }
            };

            let mut ended = None;
            for action in self.session.handle(event) {
                if let Some(termination) = self.execute(action, &producer, &control, &service_tx) {
                    ended = Some(termination);
                }
            }
            if let Some(termination) = ended {
                break termination;
            }
        };

        // Leftover jobs see the new generation and stop queueing.
        control.cancel();

        let summary = SessionSummary {
            termination,
            history: self.session.history().context().to_vec(),
            turns: self.session.history().total_appended(),
        };
        match &summary.termination {
            Termination::DeviceFailed(message) => Err(HaloError::AudioDevice {
                message: message.clone(),
            }),
            _ => Ok(summary),
        }
    }

    fn execute(
        &mut self,
        action: Action,
        producer: &PlaybackProducer,
        control: &PlaybackControl,
        events: &Sender<SessionEvent>,
    ) -> Option<Termination> {
        match action {
            Action::Recognize { request, utterance } => {
                let recognizer = self.services.recognizer.clone();
                let tx = events.clone();
                let spawned = spawn_job("recognize", move || {
                    let result = recognizer.recognize(&utterance);
                    send(&tx, SessionEvent::Recognized { request, result });
                });
                if let Err(e) = spawned {
                    send(
                        events,
                        SessionEvent::Recognized {
                            request,
                            result: Err(BackendError::Other(e.to_string())),
                        },
                    );
                }
            }
            Action::Respond {
                turn,
                user_text,
                history,
            } => {
                let responder = self.services.responder.clone();
                let job = self.response_job(turn, producer, events);
                let spawned = spawn_job("respond", move || {
                    let stream = responder.respond(&history, &user_text);
                    job.run(stream);
                });
                if let Err(e) = spawned {
                    send(
                        events,
                        SessionEvent::ResponseEnded {
                            turn,
                            result: Err(BackendError::Other(e.to_string())),
                        },
                    );
                }
            }
            Action::Say { turn, text } => {
                let job = self.response_job(turn, producer, events);
                let spawned = spawn_job("say", move || {
                    let stream: TextStream = Box::new(std::iter::once(Ok(text)));
                    job.run(Ok(stream));
                });
                if let Err(e) = spawned {
                    send(
                        events,
                        SessionEvent::ResponseEnded {
                            turn,
                            result: Err(BackendError::Other(e.to_string())),
                        },
                    );
                }
            }
            Action::PlayFiller { turn } => {
                if let Some(pcm) = self.filler.as_mut().and_then(FillerClips::next_clip) {
                    producer.try_enqueue_filler(turn, pcm);
                }
            }
            Action::StopFiller => control.stop_filler(),
            Action::CancelPlayback => {
                control.cancel();
            }
            Action::Notify(change) => {
                for observer in &self.observers {
                    observer.on_state_change(&change);
                }
            }
            Action::Terminate(termination) => return Some(termination),
        }
        None
    }

    /// The generation is read here, on the session thread, so a job started
    /// right after a cancellation is never mistaken for a cancelled one.
    fn response_job(
        &self,
        turn: u64,
        producer: &PlaybackProducer,
        events: &Sender<SessionEvent>,
    ) -> ResponseJob {
        ResponseJob {
            turn,
            generation: producer.generation(),
            producer: producer.clone(),
            synthesizer: self
                .config
                .presynthesize
                .then(|| self.services.synthesizer.clone()),
            voice: self.config.voice.clone(),
            rewriter: self.rewriter.clone(),
            splitter: SentenceSplitter::new(self.config.max_len),
            events: events.clone(),
        }
    }
}

/// Splits one streamed response into sentences and queues them.
struct ResponseJob {
    turn: u64,
    generation: u64,
    producer: PlaybackProducer,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    voice: VoiceParams,
    rewriter: TextRewriter,
    splitter: SentenceSplitter,
    events: Sender<SessionEvent>,
}

impl ResponseJob {
    fn run(mut self, stream: std::result::Result<TextStream, BackendError>) {
        let result = self.stream(stream);
        send(
            &self.events,
            SessionEvent::ResponseEnded {
                turn: self.turn,
                result,
            },
        );
    }

    fn stream(
        &mut self,
        stream: std::result::Result<TextStream, BackendError>,
    ) -> std::result::Result<(), BackendError> {
        for fragment in stream? {
            let fragment = fragment?;
            for sentence in self.splitter.push(&fragment) {
                if !self.speak(&sentence) {
                    return Ok(());
                }
            }
        }
        if let Some(rest) = self.splitter.finish() {
            self.speak(&rest);
        }
        Ok(())
    }

    /// Returns false once the turn is cancelled or playback is gone.
    fn speak(&mut self, sentence: &str) -> bool {
        if self.producer.generation() != self.generation {
            tracing::debug!(turn = self.turn, "response cancelled, stop queueing");
            return false;
        }
        let text = self.rewriter.response(sentence);
        if text.is_empty() {
            return true;
        }

        let pcm = match &self.synthesizer {
            Some(synthesizer) => match synthesizer.synthesize(&text, &self.voice) {
                Ok(pcm) => Some(pcm),
                Err(e) => {
                    tracing::warn!(turn = self.turn, error = %e, "synthesis failed, sentence skipped");
                    return true;
                }
            },
            None => None,
        };

        match self
            .producer
            .enqueue_in(self.generation, self.turn, text.clone(), pcm)
        {
            Ok(seq) => {
                send(
                    &self.events,
                    SessionEvent::SentenceQueued {
                        turn: self.turn,
                        seq,
                        text,
                    },
                );
                true
            }
            Err(e) => {
                tracing::debug!(turn = self.turn, error = %e, "playback queue closed");
                false
            }
        }
    }
}

fn spawn_job(name: &str, job: impl FnOnce() + Send + 'static) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("halo-{name}"))
        .spawn(job)
        .map(|_| ())
        .inspect_err(|e| tracing::error!(job = name, error = %e, "failed to spawn job thread"))
}

fn send(tx: &Sender<SessionEvent>, event: SessionEvent) {
    if tx.send(event).is_err() {
        tracing::debug!("session gone, job result dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFrame, CloseReason, ManualClock, MockAudioSink, Utterance};
    use crate::backend::{MockRecognizer, MockResponder, MockSynthesizer};
    use crate::config::ConversationSection;
    use crate::conversation::observer::ChannelObserver;
    use crate::conversation::session::SessionConfig;
    use crate::conversation::state::SessionState;
    use crate::filters::{FilterConfig, QualityFilters};
    use crate::matcher::MatcherSet;
    use crate::pipeline::LogReporter;
    use crate::playback::{PlaybackConfig, PlaybackQueue};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    fn utterance(id: u64) -> Utterance {
        let frame = AudioFrame::new(vec![0; 320], Instant::now(), 16000, 0);
        Utterance::new(id, vec![frame], CloseReason::Hangover, 0)
    }

    struct Harness {
        capture_tx: Sender<CaptureEvent>,
        sink: MockAudioSink,
        handle: thread::JoinHandle<Result<SessionSummary>>,
        states: Receiver<crate::conversation::StateChange>,
    }

    fn start(
        recognizer: MockRecognizer,
        responder: Arc<MockResponder>,
        config: RuntimeConfig,
        sink: MockAudioSink,
    ) -> Harness {
        start_with_filler(recognizer, responder, config, sink, None)
    }

    fn start_with_filler(
        recognizer: MockRecognizer,
        responder: Arc<MockResponder>,
        config: RuntimeConfig,
        sink: MockAudioSink,
        filler: Option<FillerClips>,
    ) -> Harness {
        let services = Services::new(recognizer, responder, MockSynthesizer::new(16000));
        let queue = PlaybackQueue::new(
            &PlaybackConfig::default(),
            Box::new(sink.clone()),
            services.synthesizer.clone(),
            Arc::new(ManualClock::new()),
        );
        let (playback_tx, playback_rx) = unbounded();
        let (producer, control, runner) = queue.spawn(playback_tx, Arc::new(LogReporter));

        let rewriter = TextRewriter::new(&BTreeMap::new(), "ハロ");
        let session = Session::new(
            SessionConfig {
                filler: filler.is_some(),
                ..SessionConfig::default()
            },
            QualityFilters::new(&FilterConfig::default()),
            MatcherSet::from_config(&ConversationSection::default()).unwrap(),
            rewriter.clone(),
        );
        let (observer, states) = ChannelObserver::new();
        let mut runtime = ConversationRuntime::new(session, services, config, rewriter)
            .with_observer(Box::new(observer));
        if let Some(clips) = filler {
            runtime = runtime.with_filler(clips);
        }

        let (capture_tx, capture_rx) = unbounded();
        let handle = thread::spawn(move || {
            let result = runtime.run(RuntimeChannels {
                capture: capture_rx,
                playback: playback_rx,
                producer,
                control,
            });
            runner.join().unwrap();
            result
        });
        Harness {
            capture_tx,
            sink,
            handle,
            states,
        }
    }

    fn wait_for(states: &Receiver<crate::conversation::StateChange>, to: SessionState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let change = states.recv_timeout(remaining).expect("state change");
            if change.to == to {
                return;
            }
        }
    }

    #[test]
    fn test_turn_plays_reply_and_records_history() {
        let responder = Arc::new(MockResponder::new().with_reply(&["ハロ: 晴れ", "です。明日は", "雨です。"]));
        let harness = start(
            MockRecognizer::new().with_response("今日の天気を教えてください"),
            responder.clone(),
            RuntimeConfig::default(),
            MockAudioSink::new(16000),
        );

        harness
            .capture_tx
            .send(CaptureEvent::UtteranceReady(utterance(1)))
            .unwrap();
        drop(harness.capture_tx);
        let summary = harness.handle.join().unwrap().unwrap();

        assert_eq!(summary.termination, Termination::EndOfInput);
        assert_eq!(summary.turns, 1);
        assert_eq!(summary.history[0].user, "今日の天気を教えてください");
        assert_eq!(summary.history[0].assistant, "晴れです。明日は雨です。");
        assert_eq!(responder.requests()[0].user_text, "今日の天気を教えてください");
        // Twelve characters at 10 ms and 16 kHz.
        assert_eq!(harness.sink.samples().len(), 12 * 160);
    }

    #[test]
    fn test_farewell_reply_is_spoken_before_exit() {
        let harness = start(
            MockRecognizer::new().with_response("バイバイ"),
            Arc::new(MockResponder::new()),
            RuntimeConfig {
                presynthesize: false,
                ..RuntimeConfig::default()
            },
            MockAudioSink::new(16000),
        );

        harness
            .capture_tx
            .send(CaptureEvent::UtteranceReady(utterance(1)))
            .unwrap();
        let summary = harness.handle.join().unwrap().unwrap();

        assert_eq!(summary.termination, Termination::Farewell);
        // "バイバイ！" is five characters.
        assert_eq!(harness.sink.samples().len(), 5 * 160);
    }

    #[test]
    fn test_interrupt_cuts_playback_short() {
        let long_reply = "昔々あるところにおじいさんとおばあさんが住んでいました。".repeat(8);
        let responder = Arc::new(MockResponder::new().with_reply(&[long_reply.as_str()]));
        let harness = start(
            MockRecognizer::new()
                .with_response("昔話をしてください")
                .with_response("ストップ"),
            responder,
            RuntimeConfig::default(),
            MockAudioSink::new(16000).with_write_delay(Duration::from_millis(5)),
        );
        let sink = harness.sink.clone();

        harness
            .capture_tx
            .send(CaptureEvent::UtteranceReady(utterance(1)))
            .unwrap();
        wait_for(&harness.states, SessionState::Speaking);
        harness
            .capture_tx
            .send(CaptureEvent::UtteranceReady(utterance(2)))
            .unwrap();
        wait_for(&harness.states, SessionState::Listening);
        drop(harness.capture_tx);

        let summary = harness.handle.join().unwrap().unwrap();
        assert!(summary.history[0].interrupted);
        let full = long_reply.chars().count() * 160;
        assert!(sink.samples().len() < full);
    }

    #[test]
    fn test_filler_plays_before_slow_reply() {
        let responder = Arc::new(
            MockResponder::new()
                .with_reply(&["晴れです。"])
                .with_fragment_delay(Duration::from_millis(100)),
        );
        let clips = FillerClips::new(vec![crate::backend::Pcm::new(vec![9; 640], 16000)]);
        let harness = start_with_filler(
            MockRecognizer::new().with_response("今日の天気を教えてください"),
            responder,
            RuntimeConfig::default(),
            MockAudioSink::new(16000),
            Some(clips),
        );

        harness
            .capture_tx
            .send(CaptureEvent::UtteranceReady(utterance(1)))
            .unwrap();
        drop(harness.capture_tx);
        let summary = harness.handle.join().unwrap().unwrap();

        assert_eq!(summary.history[0].assistant, "晴れです。");
        let samples = harness.sink.samples();
        assert!(samples[..640].iter().all(|&s| s == 9));
        // Then five characters of reply.
        assert_eq!(samples.len(), 640 + 5 * 160);
    }

    #[test]
    fn test_device_failure_is_an_error() {
        let harness = start(
            MockRecognizer::new(),
            Arc::new(MockResponder::new()),
            RuntimeConfig::default(),
            MockAudioSink::new(16000),
        );
        harness
            .capture_tx
            .send(CaptureEvent::DeviceFailed("mic unplugged".to_string()))
            .unwrap();
        let result = harness.handle.join().unwrap();
        assert!(matches!(result, Err(HaloError::AudioDevice { .. })));
    }

    #[test]
    fn test_capture_event_conversion() {
        let event = SessionEvent::from(CaptureEvent::SpeechStarted {
            utterance_id: 4,
            at: Instant::now(),
        });
        assert_eq!(event, SessionEvent::SpeechStarted { utterance_id: 4 });
    }
}
