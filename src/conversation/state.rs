use std::fmt;

/// Phase of the conversation. Exactly one at a time, owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transcripts are only checked for the wake phrase.
    WaitingWake,
    /// The next accepted transcript starts a turn.
    Listening,
    /// A turn is being recognized or answered; nothing is spoken yet.
    Thinking,
    /// The response is playing.
    Speaking,
}

impl SessionState {
    /// States in which the session can end without abandoning work.
    pub fn is_resting(self) -> bool {
        matches!(self, SessionState::WaitingWake | SessionState::Listening)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::WaitingWake => "waiting-wake",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
    /// Turn in progress when the change happened, if any.
    pub turn: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resting_states() {
        assert!(SessionState::WaitingWake.is_resting());
        assert!(SessionState::Listening.is_resting());
        assert!(!SessionState::Thinking.is_resting());
        assert!(!SessionState::Speaking.is_resting());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::WaitingWake.to_string(), "waiting-wake");
        assert_eq!(SessionState::Speaking.to_string(), "speaking");
    }
}
