use crate::conversation::session::SessionConfig;
use crate::defaults;
use crate::error::{HaloError, Result};
use crate::filters::FilterConfig;
use crate::gate::GateConfig;
use crate::playback::PlaybackConfig;
use crate::vad::SegmenterConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub gate: GateSection,
    pub filters: FiltersSection,
    pub playback: PlaybackSection,
    pub voice: VoiceSection,
    pub conversation: ConversationSection,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
}

/// Voice activity segmentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub aggressiveness: u8,
    pub min_consecutive_speech_frames: u32,
    pub hangover_frames: u32,
    pub pre_roll_frames: u32,
    pub max_utterance_ms: u32,
}

/// Loopback correlation gate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateSection {
    pub enabled: bool,
    pub corr_threshold: f32,
    pub max_lag_ms: u32,
    pub lag_step_ms: u32,
    pub retention_ms: u32,
}

/// Recognition quality filters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FiltersSection {
    pub coherence_threshold: f32,
    pub min_fragment_chars: usize,
    pub similarity_threshold: f32,
    pub min_confidence: f32,
    pub fillers: Vec<String>,
}

/// Streaming playback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSection {
    pub max_len: usize,
    pub queue_size: usize,
    pub block_ms: u32,
    pub presynthesize: bool,
    pub use_filler: bool,
    /// Directory of `.wav` clips played while a reply is generated.
    pub filler_dir: Option<PathBuf>,
}

/// Synthesizer voice parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceSection {
    pub speaker: u32,
    pub speed_scale: f32,
    pub pitch_scale: f32,
    pub intonation_scale: f32,
}

/// Turn-taking behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationSection {
    pub wake_phrases: Vec<String>,
    pub wake_patterns: Vec<String>,
    pub interrupt_phrases: Vec<String>,
    pub interrupt_patterns: Vec<String>,
    pub farewell_phrases: Vec<String>,
    pub farewell_patterns: Vec<String>,
    pub always_listening: bool,
    pub history_turns: usize,
    pub farewell_reply: Option<String>,
    pub assistant_name: String,
    pub text_replacements: BTreeMap<String, String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_duration_ms: defaults::FRAME_DURATION_MS,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: defaults::AGGRESSIVENESS,
            min_consecutive_speech_frames: defaults::MIN_CONSECUTIVE_SPEECH_FRAMES,
            hangover_frames: defaults::HANGOVER_FRAMES,
            pre_roll_frames: defaults::PRE_ROLL_FRAMES,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
        }
    }
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            corr_threshold: defaults::CORR_THRESHOLD,
            max_lag_ms: defaults::MAX_LAG_MS,
            lag_step_ms: defaults::LAG_STEP_MS,
            retention_ms: defaults::LOOPBACK_RETENTION_MS,
        }
    }
}

impl Default for FiltersSection {
    fn default() -> Self {
        Self {
            coherence_threshold: defaults::COHERENCE_THRESHOLD,
            min_fragment_chars: defaults::MIN_FRAGMENT_CHARS,
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
            min_confidence: 0.0,
            fillers: defaults::FILLERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            max_len: defaults::MAX_SENTENCE_CHARS,
            queue_size: defaults::QUEUE_SIZE,
            block_ms: defaults::PLAYBACK_BLOCK_MS,
            presynthesize: true,
            use_filler: false,
            filler_dir: None,
        }
    }
}

impl Default for VoiceSection {
    fn default() -> Self {
        Self {
            speaker: defaults::SPEAKER,
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
        }
    }
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            wake_phrases: Vec::new(),
            wake_patterns: Vec::new(),
            interrupt_phrases: defaults::INTERRUPT_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            interrupt_patterns: Vec::new(),
            farewell_phrases: defaults::FAREWELL_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            farewell_patterns: Vec::new(),
            always_listening: false,
            history_turns: defaults::HISTORY_TURNS,
            farewell_reply: Some(defaults::FAREWELL_REPLY.to_string()),
            assistant_name: defaults::ASSISTANT_NAME.to_string(),
            text_replacements: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is an error, never silently replaced by defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "config file missing, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - HALO_AUDIO_DEVICE → audio.device
    /// - HALO_SAMPLE_RATE → audio.sample_rate
    /// - HALO_CORR_THRESHOLD → gate.corr_threshold
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("HALO_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(rate) = std::env::var("HALO_SAMPLE_RATE")
            && let Ok(rate) = rate.parse::<u32>()
        {
            self.audio.sample_rate = rate;
        }

        if let Ok(threshold) = std::env::var("HALO_CORR_THRESHOLD")
            && let Ok(threshold) = threshold.parse::<f32>()
        {
            self.gate.corr_threshold = threshold;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/halo/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("halo").join("config.toml"))
            .ok_or_else(|| HaloError::Other("Could not determine config directory".to_string()))
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> HaloError {
            HaloError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if !(8000..=48000).contains(&self.audio.sample_rate) {
            return Err(invalid("audio.sample_rate", "must be within 8000..=48000"));
        }
        if !(5..=100).contains(&self.audio.frame_duration_ms) {
            return Err(invalid("audio.frame_duration_ms", "must be within 5..=100"));
        }
        if self.vad.aggressiveness > 3 {
            return Err(invalid("vad.aggressiveness", "must be within 0..=3"));
        }
        if self.vad.min_consecutive_speech_frames == 0 {
            return Err(invalid("vad.min_consecutive_speech_frames", "must be positive"));
        }
        if self.vad.hangover_frames == 0 {
            return Err(invalid("vad.hangover_frames", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.gate.corr_threshold) {
            return Err(invalid("gate.corr_threshold", "must be within 0.0..=1.0"));
        }
        if self.gate.lag_step_ms == 0 {
            return Err(invalid("gate.lag_step_ms", "must be positive"));
        }
        if self.gate.retention_ms < self.gate.max_lag_ms + self.audio.frame_duration_ms {
            return Err(invalid(
                "gate.retention_ms",
                "must cover max_lag_ms plus one frame",
            ));
        }
        if !(0.0..=1.0).contains(&self.filters.coherence_threshold) {
            return Err(invalid("filters.coherence_threshold", "must be within 0.0..=1.0"));
        }
        if !(0.0..=1.0).contains(&self.filters.similarity_threshold) {
            return Err(invalid("filters.similarity_threshold", "must be within 0.0..=1.0"));
        }
        if self.playback.max_len == 0 {
            return Err(invalid("playback.max_len", "must be positive"));
        }
        if self.playback.queue_size == 0 {
            return Err(invalid("playback.queue_size", "must be positive"));
        }
        if self.playback.block_ms == 0 {
            return Err(invalid("playback.block_ms", "must be positive"));
        }
        if self.playback.use_filler && self.playback.filler_dir.is_none() {
            return Err(invalid("playback.filler_dir", "required when use_filler is set"));
        }
        if self.conversation.history_turns == 0 {
            return Err(invalid("conversation.history_turns", "must be positive"));
        }
        Ok(())
    }

    /// Samples in one capture frame.
    pub fn frame_len(&self) -> usize {
        (self.audio.sample_rate as usize * self.audio.frame_duration_ms as usize) / 1000
    }

    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            min_consecutive_speech_frames: self.vad.min_consecutive_speech_frames,
            hangover_frames: self.vad.hangover_frames,
            pre_roll_frames: self.vad.pre_roll_frames,
            max_frames: (self.vad.max_utterance_ms / self.audio.frame_duration_ms.max(1)).max(1),
        }
    }

    pub fn gate(&self) -> GateConfig {
        GateConfig {
            corr_threshold: self.gate.corr_threshold,
            max_lag_ms: self.gate.max_lag_ms,
            lag_step_ms: self.gate.lag_step_ms,
            sample_rate: self.audio.sample_rate,
        }
    }

    pub fn filters(&self) -> FilterConfig {
        FilterConfig {
            coherence_threshold: self.filters.coherence_threshold,
            min_fragment_chars: self.filters.min_fragment_chars,
            similarity_threshold: self.filters.similarity_threshold,
            min_confidence: self.filters.min_confidence,
            fillers: self.filters.fillers.clone(),
        }
    }

    pub fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            queue_size: self.playback.queue_size,
            block_ms: self.playback.block_ms,
            voice: crate::backend::VoiceParams {
                speaker: self.voice.speaker,
                speed_scale: self.voice.speed_scale,
                pitch_scale: self.voice.pitch_scale,
                intonation_scale: self.voice.intonation_scale,
            },
        }
    }

    /// Serialize the full configuration for display.
    pub fn to_display_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HaloError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Serialize one top-level section (e.g. `gate`) for display.
    pub fn display_section(&self, section: &str) -> Result<String> {
        let full: toml::Table = toml::from_str(&self.to_display_toml()?)?;
        let table = full
            .get(section)
            .and_then(toml::Value::as_table)
            .ok_or_else(|| HaloError::ConfigInvalidValue {
                key: section.to_string(),
                message: "unknown section".to_string(),
            })?;
        let mut root = toml::Table::new();
        root.insert(section.to_string(), toml::Value::Table(table.clone()));
        toml::to_string_pretty(&root).map_err(|e| HaloError::ConfigParse {
            message: e.to_string(),
        })
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            always_listening: self.conversation.always_listening,
            history_turns: self.conversation.history_turns,
            farewell_reply: self
                .conversation
                .farewell_reply
                .clone()
                .filter(|reply| !reply.trim().is_empty()),
            filler: self.playback.use_filler,
        }
    }
}
