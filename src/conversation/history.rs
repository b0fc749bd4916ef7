//! Conversation history handed to the responder as context.

/// One exchange between the user and the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user: String,
    /// What the assistant actually got to say.
    pub assistant: String,
    /// The user cut the reply off.
    pub interrupted: bool,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            interrupted: false,
        }
    }

    pub fn interrupted(mut self) -> Self {
        self.interrupted = true;
        self
    }
}

/// Append-only log of finished turns.
///
/// Turns are never edited after they are appended. Only the most recent
/// `window` turns are retained; older ones are evicted from the front.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
    window: usize,
    appended: u64,
}

impl ConversationLog {
    pub fn new(window: usize) -> Self {
        Self {
            turns: Vec::with_capacity(window),
            window,
            appended: 0,
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.appended += 1;
        if self.window == 0 {
            return;
        }
        self.turns.push(turn);
        if self.turns.len() > self.window {
            let excess = self.turns.len() - self.window;
            self.turns.drain(..excess);
        }
    }

    /// Retained turns, oldest first.
    pub fn context(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Turns appended over the whole session, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.appended
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
