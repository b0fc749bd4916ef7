//! Turn-taking state machine.
//!
//! [`Session::handle`] is pure: it takes one event, updates the state and
//! returns the actions the runtime has to carry out. Nothing here blocks or
//! spawns.

use crate::audio::Utterance;
use crate::backend::TranscriptCandidate;
use crate::conversation::history::{ConversationLog, ConversationTurn};
use crate::conversation::state::{SessionState, StateChange};
use crate::error::BackendError;
use crate::filters::{QualityFilters, Verdict};
use crate::matcher::{Intent, MatcherSet};
use crate::playback::PlaybackEvent;
use crate::text::TextRewriter;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Return to `Listening` instead of `WaitingWake` after a response.
    pub always_listening: bool,
    /// Finished turns handed to the responder as context.
    pub history_turns: usize,
    /// Spoken before the session ends on a farewell.
    pub farewell_reply: Option<String>,
    /// Play a filler clip while a reply is being generated.
    pub filler: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            always_listening: false,
            history_turns: crate::defaults::HISTORY_TURNS,
            farewell_reply: Some(crate::defaults::FAREWELL_REPLY.to_string()),
            filler: false,
        }
    }
}

/// Everything the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SpeechStarted { utterance_id: u64 },
    UtteranceClosed(Utterance),
    Recognized {
        request: u64,
        result: Result<TranscriptCandidate, BackendError>,
    },
    /// A response job put a sentence on the playback queue.
    SentenceQueued { turn: u64, seq: u64, text: String },
    /// A response job is done queueing.
    ResponseEnded {
        turn: u64,
        result: Result<(), BackendError>,
    },
    Playback(PlaybackEvent),
    /// The capture side closed.
    InputEnded,
    DeviceFailed(String),
}

/// Work the runtime performs on behalf of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Recognize { request: u64, utterance: Utterance },
    /// Stream a reply and queue it sentence by sentence.
    Respond {
        turn: u64,
        user_text: String,
        history: Vec<ConversationTurn>,
    },
    /// Queue fixed text as if it were a reply.
    Say { turn: u64, text: String },
    /// Queue a filler clip ahead of the reply.
    PlayFiller { turn: u64 },
    StopFiller,
    CancelPlayback,
    Notify(StateChange),
    Terminate(Termination),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Farewell,
    EndOfInput,
    DeviceFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Wake,
    Turn(u64),
    BargeIn(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Reply,
    Farewell,
}

#[derive(Debug)]
struct ActiveTurn {
    id: u64,
    kind: TurnKind,
    user: String,
    awaiting_transcript: bool,
    sentences: BTreeMap<u64, String>,
    finished: BTreeSet<u64>,
    queued: usize,
    settled: usize,
    response_done: bool,
}

impl ActiveTurn {
    fn new(id: u64, kind: TurnKind) -> Self {
        Self {
            id,
            kind,
            user: String::new(),
            awaiting_transcript: false,
            sentences: BTreeMap::new(),
            finished: BTreeSet::new(),
            queued: 0,
            settled: 0,
            response_done: false,
        }
    }

    /// Response complete and every queued item finished, failed or was
    /// cancelled. Counts tolerate playback events overtaking queue events.
    fn drained(&self) -> bool {
        self.response_done && self.settled >= self.queued
    }

    fn queued_text(&self) -> String {
        self.sentences.values().map(String::as_str).collect()
    }

    fn spoken_text(&self) -> String {
        self.sentences
            .iter()
            .filter(|(seq, _)| self.finished.contains(seq))
            .map(|(_, text)| text.as_str())
            .collect()
    }
}

pub struct Session {
    config: SessionConfig,
    filters: QualityFilters,
    matchers: MatcherSet,
    rewriter: TextRewriter,
    state: SessionState,
    log: ConversationLog,
    requests: HashMap<u64, Purpose>,
    next_request: u64,
    next_turn: u64,
    active: Option<ActiveTurn>,
    input_ended: bool,
    terminated: bool,
    filler_playing: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        filters: QualityFilters,
        matchers: MatcherSet,
        rewriter: TextRewriter,
    ) -> Self {
        let state = if matchers.has_wake() {
            SessionState::WaitingWake
        } else {
            SessionState::Listening
        };
        Self {
            log: ConversationLog::new(config.history_turns),
            config,
            filters,
            matchers,
            rewriter,
            state,
            requests: HashMap::new(),
            next_request: 0,
            next_turn: 1,
            active: None,
            input_ended: false,
            terminated: false,
            filler_playing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationLog {
        &self.log
    }

    /// Turn being recognized, answered or spoken.
    pub fn current_turn(&self) -> Option<u64> {
        self.active.as_ref().map(|t| t.id)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Recognitions issued but not yet answered.
    pub fn pending_recognitions(&self) -> usize {
        self.requests.len()
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.terminated {
            tracing::debug!("event after termination ignored");
            return actions;
        }

        match event {
            SessionEvent::SpeechStarted { utterance_id } => {
                tracing::debug!(utterance_id, state = %self.state, "speech started");
            }
            SessionEvent::UtteranceClosed(utterance) => self.on_utterance(utterance, &mut actions),
            SessionEvent::Recognized { request, result } => {
                self.on_recognized(request, result, &mut actions)
            }
            SessionEvent::SentenceQueued { turn, seq, text } => {
                self.on_sentence_queued(turn, seq, text, &mut actions)
            }
            SessionEvent::ResponseEnded { turn, result } => {
                self.on_response_ended(turn, result, &mut actions)
            }
            SessionEvent::Playback(event) => self.on_playback(event, &mut actions),
            SessionEvent::InputEnded => {
                tracing::debug!("input ended");
                self.input_ended = true;
            }
            SessionEvent::DeviceFailed(message) => {
                tracing::error!(error = %message, "audio device failed");
                actions.push(Action::CancelPlayback);
                self.terminate(Termination::DeviceFailed(message), &mut actions);
            }
        }

        if self.input_ended && !self.terminated && self.is_settled() {
            self.terminate(Termination::EndOfInput, &mut actions);
        }
        actions
    }

    fn is_settled(&self) -> bool {
        self.state.is_resting() && self.active.is_none() && self.requests.is_empty()
    }

    fn on_utterance(&mut self, utterance: Utterance, actions: &mut Vec<Action>) {
        let purpose = match (self.state, &self.active) {
            (SessionState::WaitingWake, _) => Purpose::Wake,
            (SessionState::Listening, _) => {
                let turn = self.next_turn;
                self.next_turn += 1;
                let mut active = ActiveTurn::new(turn, TurnKind::Reply);
                active.awaiting_transcript = true;
                self.active = Some(active);
                self.transition(SessionState::Thinking, actions);
                Purpose::Turn(turn)
            }
            (SessionState::Speaking, Some(active)) if active.kind == TurnKind::Reply => {
                Purpose::BargeIn(active.id)
            }
            _ => {
                tracing::debug!(
                    utterance_id = utterance.id(),
                    state = %self.state,
                    "utterance dropped"
                );
                return;
            }
        };

        let request = self.next_request;
        self.next_request += 1;
        self.requests.insert(request, purpose);
        tracing::debug!(request, utterance_id = utterance.id(), ?purpose, "recognizing");
        actions.push(Action::Recognize { request, utterance });
    }

    fn on_recognized(
        &mut self,
        request: u64,
        result: Result<TranscriptCandidate, BackendError>,
        actions: &mut Vec<Action>,
    ) {
        let Some(purpose) = self.requests.remove(&request) else {
            tracing::debug!(request, "unknown recognition result ignored");
            return;
        };
        if !self.is_current(purpose) {
            tracing::debug!(request, ?purpose, state = %self.state, "stale recognition ignored");
            return;
        }

        let candidate = match result {
            Ok(mut candidate) => {
                candidate.text = self.rewriter.transcript(&candidate.text);
                candidate
            }
            Err(e) => {
                match e {
                    BackendError::NoSpeech => tracing::debug!(request, "no speech recognized"),
                    ref other => tracing::warn!(request, error = %other, "recognition failed"),
                }
                if let Purpose::Turn(_) = purpose {
                    self.abandon_turn(actions);
                }
                return;
            }
        };

        match purpose {
            Purpose::Wake => self.on_wake_transcript(&candidate, actions),
            Purpose::Turn(turn) => self.on_turn_transcript(turn, candidate, actions),
            Purpose::BargeIn(_) => self.on_barge_in_transcript(&candidate, actions),
        }
    }

    fn is_current(&self, purpose: Purpose) -> bool {
        match purpose {
            Purpose::Wake => self.state == SessionState::WaitingWake,
            Purpose::Turn(turn) => {
                self.state == SessionState::Thinking
                    && self
                        .active
                        .as_ref()
                        .is_some_and(|a| a.id == turn && a.awaiting_transcript)
            }
            Purpose::BargeIn(turn) => {
                self.state == SessionState::Speaking
                    && self.active.as_ref().is_some_and(|a| a.id == turn)
            }
        }
    }

    fn on_wake_transcript(&mut self, candidate: &TranscriptCandidate, actions: &mut Vec<Action>) {
        let Some(found) = self.matchers.find(Intent::Wake, &candidate.text) else {
            tracing::debug!(text = %candidate.text, "not a wake phrase");
            return;
        };
        if let Verdict::Reject(reason) = self.filters.check_command(candidate, found) {
            tracing::debug!(%reason, "wake candidate rejected");
            return;
        }
        tracing::info!(text = %candidate.text, "wake phrase heard");
        self.transition(SessionState::Listening, actions);
    }

    fn on_turn_transcript(
        &mut self,
        turn: u64,
        candidate: TranscriptCandidate,
        actions: &mut Vec<Action>,
    ) {
        if self
            .matchers
            .find(Intent::Farewell, &candidate.text)
            .is_some_and(|found| self.filters.check_command(&candidate, found).is_accept())
        {
            tracing::info!(text = %candidate.text, "farewell heard");
            self.active = None;
            self.farewell(actions);
            return;
        }

        match self.filters.check(&candidate) {
            Verdict::Accept => {
                let user_text = self.filters.clean(&candidate.text);
                tracing::info!(turn, text = %user_text, "user turn");
                if let Some(active) = self.active.as_mut() {
                    active.user = user_text.clone();
                    active.awaiting_transcript = false;
                }
                self.play_filler(turn, actions);
                actions.push(Action::Respond {
                    turn,
                    user_text,
                    history: self.log.context().to_vec(),
                });
            }
            Verdict::Reject(reason) => {
                tracing::info!(turn, %reason, text = %candidate.text, "transcript rejected");
                self.abandon_turn(actions);
            }
        }
    }

    fn on_barge_in_transcript(&mut self, candidate: &TranscriptCandidate, actions: &mut Vec<Action>) {
        let text = candidate.text.as_str();

        if let Some(found) = self.matchers.find(Intent::Farewell, text) {
            if let Verdict::Reject(reason) = self.filters.check_command(candidate, found) {
                tracing::debug!(%reason, "farewell candidate rejected");
                return;
            }
            tracing::info!(text, "farewell while speaking");
            actions.push(Action::CancelPlayback);
            self.close_interrupted_turn();
            self.farewell(actions);
            return;
        }

        let Some(found) = self.matchers.find(Intent::Interrupt, text) else {
            tracing::debug!(text, "speech during playback ignored");
            return;
        };
        if let Verdict::Reject(reason) = self.filters.check_command(candidate, found) {
            tracing::debug!(%reason, "barge-in candidate rejected");
            return;
        }
        tracing::info!(text, "interrupted");
        actions.push(Action::CancelPlayback);
        self.close_interrupted_turn();
        self.transition(SessionState::Listening, actions);

        let remainder = found.remainder(text);
        if remainder.is_empty() {
            return;
        }
        let candidate = TranscriptCandidate {
            text: remainder.to_string(),
            ..candidate.clone()
        };
        match self.filters.check(&candidate) {
            Verdict::Accept => {
                let turn = self.next_turn;
                self.next_turn += 1;
                let user_text = self.filters.clean(&candidate.text);
                tracing::info!(turn, text = %user_text, "user turn from interruption");
                let mut active = ActiveTurn::new(turn, TurnKind::Reply);
                active.user = user_text.clone();
                self.active = Some(active);
                self.transition(SessionState::Thinking, actions);
                self.play_filler(turn, actions);
                actions.push(Action::Respond {
                    turn,
                    user_text,
                    history: self.log.context().to_vec(),
                });
            }
            Verdict::Reject(reason) => {
                tracing::debug!(%reason, "interruption remainder rejected");
            }
        }
    }

    fn on_sentence_queued(&mut self, turn: u64, seq: u64, text: String, actions: &mut Vec<Action>) {
        let Some(active) = self.active.as_mut().filter(|a| a.id == turn) else {
            tracing::debug!(turn, seq, "sentence of stale turn ignored");
            return;
        };
        active.sentences.insert(seq, text);
        active.queued += 1;
        let spoken = active.queued_text();
        self.filters.assistant_spoke(&spoken);

        if self.state == SessionState::Thinking {
            self.transition(SessionState::Speaking, actions);
        }
        self.check_drained(actions);
    }

    fn on_response_ended(
        &mut self,
        turn: u64,
        result: Result<(), BackendError>,
        actions: &mut Vec<Action>,
    ) {
        let Some(active) = self.active.as_mut().filter(|a| a.id == turn) else {
            tracing::debug!(turn, "end of stale response ignored");
            return;
        };
        active.response_done = true;
        if let Err(e) = result {
            tracing::warn!(turn, error = %e, queued = active.queued, "response failed");
            if active.queued == 0 && active.kind == TurnKind::Reply {
                self.abandon_turn(actions);
                return;
            }
        }
        self.check_drained(actions);
    }

    fn on_playback(&mut self, event: PlaybackEvent, actions: &mut Vec<Action>) {
        let (turn, seq, finished) = match event {
            PlaybackEvent::Finished { turn, seq } => (turn, seq, true),
            PlaybackEvent::Cancelled { turn, seq } => (turn, seq, false),
            PlaybackEvent::Failed { turn, seq, error } => {
                tracing::warn!(turn, seq, %error, "sentence not spoken");
                (turn, seq, false)
            }
            PlaybackEvent::DeviceFailed(message) => {
                tracing::error!(error = %message, "audio output failed");
                self.terminate(Termination::DeviceFailed(message), actions);
                return;
            }
        };

        let Some(active) = self.active.as_mut().filter(|a| a.id == turn) else {
            return;
        };
        active.settled += 1;
        if finished {
            active.finished.insert(seq);
        }
        self.check_drained(actions);
    }

    fn check_drained(&mut self, actions: &mut Vec<Action>) {
        if !matches!(self.state, SessionState::Thinking | SessionState::Speaking) {
            return;
        }
        let Some(active) = self.active.take_if(|a| !a.awaiting_transcript && a.drained()) else {
            return;
        };

        match active.kind {
            TurnKind::Reply => {
                let assistant = active.spoken_text();
                tracing::info!(turn = active.id, text = %assistant, "assistant turn");
                self.log.append(ConversationTurn::new(active.user, assistant));
                self.transition(self.resting_state(), actions);
            }
            TurnKind::Farewell => {
                self.transition(self.resting_state(), actions);
                self.terminate(Termination::Farewell, actions);
            }
        }
    }

    /// Record what was said of the active reply before it was cut off.
    fn close_interrupted_turn(&mut self) {
        if let Some(active) = self.active.take() {
            let turn = ConversationTurn::new(active.user.clone(), active.spoken_text()).interrupted();
            self.log.append(turn);
        }
    }

    fn abandon_turn(&mut self, actions: &mut Vec<Action>) {
        if let Some(active) = self.active.take() {
            tracing::debug!(turn = active.id, "turn abandoned");
        }
        self.transition(SessionState::Listening, actions);
    }

    fn farewell(&mut self, actions: &mut Vec<Action>) {
        match self.config.farewell_reply.clone() {
            Some(reply) => {
                let turn = self.next_turn;
                self.next_turn += 1;
                self.active = Some(ActiveTurn::new(turn, TurnKind::Farewell));
                self.transition(SessionState::Thinking, actions);
                actions.push(Action::Say { turn, text: reply });
            }
            None => self.terminate(Termination::Farewell, actions),
        }
    }

    fn resting_state(&self) -> SessionState {
        if self.matchers.has_wake() && !self.config.always_listening {
            SessionState::WaitingWake
        } else {
            SessionState::Listening
        }
    }

    fn play_filler(&mut self, turn: u64, actions: &mut Vec<Action>) {
        if self.config.filler {
            self.filler_playing = true;
            actions.push(Action::PlayFiller { turn });
        }
    }

    fn transition(&mut self, to: SessionState, actions: &mut Vec<Action>) {
        if self.state == to {
            return;
        }
        if self.filler_playing && self.state == SessionState::Thinking {
            self.filler_playing = false;
            actions.push(Action::StopFiller);
        }
        let change = StateChange {
            from: self.state,
            to,
            turn: self.current_turn(),
        };
        self.state = to;
        actions.push(Action::Notify(change));
    }

    fn terminate(&mut self, reason: Termination, actions: &mut Vec<Action>) {
        tracing::info!(?reason, turns = self.log.total_appended(), "session ending");
        self.terminated = true;
        actions.push(Action::Terminate(reason));
    }
}
