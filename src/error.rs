//! Error types for halo-voice.

use thiserror::Error;

/// Failure reported by an external speech or language backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("no speech in audio")]
    NoSpeech,

    #[error("invalid voice: {0}")]
    InvalidVoice(String),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Network and quota failures may succeed on a later turn.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Network(_) | BackendError::Quota(_))
    }
}

#[derive(Error, Debug)]
pub enum HaloError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device failed: {message}")]
    AudioDevice { message: String },

    #[error("WAV error: {message}")]
    Wav { message: String },

    // Backend and turn errors
    #[error("{backend} backend failed: {source}")]
    TransientService {
        backend: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("No speech detected")]
    NoSpeechDetected,

    #[error("Transcript rejected: {reason}")]
    QualityRejected { reason: String },

    #[error("Session closed")]
    SessionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl HaloError {
    /// Only audio device failures end a session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HaloError::AudioDevice { .. } | HaloError::AudioDeviceNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HaloError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = HaloError::ConfigInvalidValue {
            key: "gate.corr_threshold".to_string(),
            message: "must be within 0.0..=1.0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for gate.corr_threshold: must be within 0.0..=1.0"
        );
    }

    #[test]
    fn test_config_file_not_found_display() {
        let error = HaloError::ConfigFileNotFound {
            path: "/path/to/config.toml".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Configuration file not found at /path/to/config.toml"
        );
    }

    #[test]
    fn test_audio_device_display() {
        let error = HaloError::AudioDevice {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device failed: stream closed");
    }

    #[test]
    fn test_transient_service_display_names_backend() {
        let error = HaloError::TransientService {
            backend: "recognizer",
            source: BackendError::Network("timeout".to_string()),
        };
        assert_eq!(
            error.to_string(),
            "recognizer backend failed: network error: timeout"
        );
    }

    #[test]
    fn test_quality_rejected_display() {
        let error = HaloError::QualityRejected {
            reason: "incoherent (0.21)".to_string(),
        };
        assert_eq!(error.to_string(), "Transcript rejected: incoherent (0.21)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: HaloError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_only_device_errors_are_fatal() {
        assert!(HaloError::AudioDevice {
            message: "x".to_string()
        }
        .is_fatal());
        assert!(!HaloError::NoSpeechDetected.is_fatal());
        assert!(!HaloError::TransientService {
            backend: "responder",
            source: BackendError::Quota("daily".to_string()),
        }
        .is_fatal());
    }

    #[test]
    fn test_backend_error_transient_kinds() {
        assert!(BackendError::Network("reset".to_string()).is_transient());
        assert!(BackendError::Quota("limit".to_string()).is_transient());
        assert!(!BackendError::NoSpeech.is_transient());
        assert!(!BackendError::InvalidVoice("99".to_string()).is_transient());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HaloError>();
        assert_send_sync::<BackendError>();
    }
}
