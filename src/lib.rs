//! halo-voice - Turn-taking voice assistant front end
//!
//! Segments microphone audio into utterances, suppresses the assistant's own
//! voice picked up from the speaker, filters unusable transcripts and streams
//! synthesized replies sentence by sentence, with barge-in.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod analysis;
pub mod audio;
pub mod backend;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod filters;
pub mod gate;
pub mod matcher;
pub mod pipeline;
pub mod playback;
pub mod text;
pub mod vad;

// Composition root - needs everything
pub mod assistant;

// Core traits (source → segment → converse → speak → sink)
pub use audio::{AudioSink, AudioSource, Clock};
pub use backend::{Recognizer, Responder, Services, Synthesizer};
pub use matcher::{IntentClassifier, PhraseMatcher};
pub use vad::VoiceClassifier;

// Session
pub use assistant::Assistant;
pub use conversation::{
    ConversationRuntime, Session, SessionState, SessionSummary, StateChange, StateObserver,
    Termination,
};

// Error handling
pub use error::{BackendError, HaloError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
