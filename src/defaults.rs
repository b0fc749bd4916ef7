//! Default configuration constants for halo-voice.
//!
//! Shared by the config sections and by the component constructors so the
//! two never drift apart.

/// Default capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one capture frame in milliseconds.
///
/// 20ms is the usual speech-processing frame: long enough for a stable energy
/// estimate, short enough that debounce counts stay responsive.
pub const FRAME_DURATION_MS: u32 = 20;

/// Voice classifier strictness, 0 (permissive) to 3 (strict).
pub const AGGRESSIVENESS: u8 = 3;

/// Consecutive speech frames required before an utterance opens.
///
/// 12 frames at 20ms = 240ms of sustained voice, which rejects door knocks
/// and keyboard clicks.
pub const MIN_CONSECUTIVE_SPEECH_FRAMES: u32 = 12;

/// Consecutive non-speech frames that close an open utterance.
pub const HANGOVER_FRAMES: u32 = 30;

/// Frames kept from before the debounce run and prepended to the utterance.
pub const PRE_ROLL_FRAMES: u32 = 5;

/// Upper bound on a single utterance before it is force-closed.
pub const MAX_UTTERANCE_MS: u32 = 15_000;

/// Correlation coefficient at or above which a mic frame counts as loopback.
pub const CORR_THRESHOLD: f32 = 0.60;

/// Largest speaker-to-microphone delay searched by the gate.
pub const MAX_LAG_MS: u32 = 95;

/// Coarse lag step of the gate search before sample-accurate refinement.
pub const LAG_STEP_MS: u32 = 1;

/// How long played audio stays in the loopback buffer.
pub const LOOPBACK_RETENTION_MS: u32 = 1000;

/// Minimum coherence score for a transcript to reach the language model.
pub const COHERENCE_THRESHOLD: f32 = 0.45;

/// Sentences shorter than this (in characters) count as fragments.
pub const MIN_FRAGMENT_CHARS: usize = 8;

/// Similarity above which a transcript is treated as a duplicate or echo.
pub const SIMILARITY_THRESHOLD: f32 = 0.70;

/// Filler words that carry no content on their own.
pub const FILLERS: &[&str] = &[
    "えー", "えっと", "あの", "あのー", "その", "まあ", "うーん", "えーと", "ええと", "んー",
];

/// Longest sentence span handed to the synthesizer, in characters.
pub const MAX_SENTENCE_CHARS: usize = 80;

/// Capacity of the playback queue.
pub const QUEUE_SIZE: usize = 4;

/// Size of one playback block written to the sink and the loopback buffer.
pub const PLAYBACK_BLOCK_MS: u32 = 20;

/// Default synthesizer speaker id.
pub const SPEAKER: u32 = 89;

/// Farewell phrases that end the session.
pub const FAREWELL_PHRASES: &[&str] = &["終了", "バイバイ", "さようなら"];

/// Phrases that cut the assistant off mid-response.
pub const INTERRUPT_PHRASES: &[&str] = &["ストップ", "ちょっと待って", "stop"];

/// Reply spoken before the session ends on a farewell.
pub const FAREWELL_REPLY: &str = "バイバイ！";

/// Name the assistant answers to and prefixes its own lines with.
pub const ASSISTANT_NAME: &str = "ハロ";

/// Conversation turns kept as language model context.
pub const HISTORY_TURNS: usize = 10;
