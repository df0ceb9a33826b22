//! Events emitted by the sync client.
//!
//! [`SyncEvent`] is the only channel through which the session manager and
//! the harvester report progress to their caller.

use serde::{Deserialize, Serialize};

use crate::types::{Contact, PairingPayload};

/// Reason a session stopped being usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The account rejected the pairing/credentials.
    AuthFailure(String),
    /// Nobody confirmed the pairing in time.
    PairingTimeout,
    /// Network error
    NetworkError(String),
    /// The account logged this device out remotely.
    LoggedOut,
    /// Connection replaced by another client
    Replaced,
    /// The reconnect policy gave up.
    RetriesExhausted { attempts: u32 },
    /// The caller stopped the session.
    Stopped,
}

impl DisconnectReason {
    /// Whether reconnecting can recover from this reason.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DisconnectReason::NetworkError(_))
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::AuthFailure(e) => write!(f, "authentication failed: {}", e),
            DisconnectReason::PairingTimeout => write!(f, "pairing timed out"),
            DisconnectReason::NetworkError(e) => write!(f, "network error: {}", e),
            DisconnectReason::LoggedOut => write!(f, "logged out"),
            DisconnectReason::Replaced => write!(f, "connection replaced"),
            DisconnectReason::RetriesExhausted { attempts } => {
                write!(f, "gave up after {} reconnect attempts", attempts)
            }
            DisconnectReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// All events a subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    PairingRequired(PairingPayload),
    Authenticated,
    Disconnected(DisconnectReason),
    ContactDiscovered(Contact),
    HarvestComplete { count: usize },
}
