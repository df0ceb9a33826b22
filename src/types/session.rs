//! Session identity and lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned to each accepted `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    AwaitingPairing,
    Authenticating,
    Ready,
    Disconnected,
    Failed,
}

impl SessionState {
    /// Whether a fresh `start()` may be accepted from this state.
    pub fn accepts_start(self) -> bool {
        matches!(self, SessionState::Uninitialized | SessionState::Failed)
    }

    /// Whether a connection handle is held in this state.
    pub fn is_live(self) -> bool {
        !matches!(self, SessionState::Uninitialized | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AwaitingPairing => "awaiting_pairing",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_only_when_idle() {
        assert!(SessionState::Uninitialized.accepts_start());
        assert!(SessionState::Failed.accepts_start());
        for state in [
            SessionState::AwaitingPairing,
            SessionState::Authenticating,
            SessionState::Ready,
            SessionState::Disconnected,
        ] {
            assert!(!state.accepts_start(), "{state} must reject start");
            assert!(state.is_live());
        }
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&SessionState::AwaitingPairing).unwrap();
        assert_eq!(json, "\"awaiting_pairing\"");
    }
}
