//! Server lifecycle state machine.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle of the HTTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Accepting new connections.
    Running,
    /// No new connections; in-flight work is finishing.
    Draining,
    /// Terminal.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Running => "running",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Publishes [`ServerState`] transitions and rejects backwards moves.
#[derive(Debug)]
pub struct StateTracker {
    tx: watch::Sender<ServerState>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Running);
        Self { tx }
    }

    pub fn current(&self) -> ServerState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    /// Move to `next` if it is the successor of the current state.
    /// Returns `false` when the transition is not allowed.
    pub fn advance(&self, next: ServerState) -> bool {
        self.tx.send_if_modified(|current| {
            let allowed = matches!(
                (*current, next),
                (ServerState::Running, ServerState::Draining)
                    | (ServerState::Draining, ServerState::Stopped)
            );
            if allowed {
                tracing::debug!(from = %current, to = %next, "Server state transition");
                *current = next;
            }
            allowed
        })
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward_once() {
        let state = StateTracker::new();
        let rx = state.subscribe();
        assert_eq!(state.current(), ServerState::Running);

        assert!(!state.advance(ServerState::Stopped));
        assert!(state.advance(ServerState::Draining));
        assert!(!state.advance(ServerState::Draining));
        assert!(state.advance(ServerState::Stopped));
        assert!(!state.advance(ServerState::Running));

        assert_eq!(*rx.borrow(), ServerState::Stopped);
    }
}
