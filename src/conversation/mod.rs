//! Conversation state machine.
//!
//! [`Session`] decides, [`ConversationRuntime`] executes. The session owns
//! the state, the quality filters, the matchers and the history; everything
//! else reports to it through events.

pub mod history;
pub mod observer;
pub mod runtime;
pub mod session;
pub mod state;

pub use history::{ConversationLog, ConversationTurn};
pub use observer::{ChannelObserver, LogObserver, StateObserver};
pub use runtime::{ConversationRuntime, RuntimeChannels, RuntimeConfig, SessionSummary};
pub use session::{Action, Session, SessionConfig, SessionEvent, Termination};
pub use state::{SessionState, StateChange};
