//! Hooks for actuation collaborators (LEDs, servos) that follow the session.

use crate::conversation::state::StateChange;
use crossbeam_channel::{Receiver, Sender, unbounded};

/// Notified on every state transition, on the session thread.
///
/// Implementations must return quickly; anything slow belongs on the
/// other side of a [`ChannelObserver`].
pub trait StateObserver: Send {
    fn on_state_change(&self, change: &StateChange);
}

/// Logs transitions at info level.
pub struct LogObserver;

impl StateObserver for LogObserver {
    fn on_state_change(&self, change: &StateChange) {
        tracing::info!(
            from = %change.from,
            to = %change.to,
            turn = change.turn,
            "session state changed"
        );
    }
}

/// Forwards transitions over a channel.
pub struct ChannelObserver {
    tx: Sender<StateChange>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<StateChange>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl StateObserver for ChannelObserver {
    fn on_state_change(&self, change: &StateChange) {
        if self.tx.send(*change).is_err() {
            tracing::debug!("state observer receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::SessionState;

    #[test]
    fn test_channel_observer_forwards_changes() {
        let (observer, rx) = ChannelObserver::new();
        let change = StateChange {
            from: SessionState::Listening,
            to: SessionState::Thinking,
            turn: Some(1),
        };
        observer.on_state_change(&change);
        assert_eq!(rx.try_recv().unwrap(), change);
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_state_change(&StateChange {
            from: SessionState::Speaking,
            to: SessionState::WaitingWake,
            turn: None,
        });
    }
}
