use thiserror::Error;

use crate::transport::TransportError;
use crate::types::JID;

/// Errors surfaced by the session manager and harvester.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a session is already active; call `stop` before starting another")]
    AlreadyActive,
    #[error("authentication failed: {0}")]
    AuthFailure(String),
    #[error("transport disconnected: {0}")]
    TransportDisconnected(String),
    #[error("session is not ready; wait for `Authenticated` before harvesting")]
    SessionNotReady,
    #[error("lookup for conversation {conversation} failed: {cause}")]
    ConversationLookupFailed { conversation: JID, cause: String },
    #[error("harvest cancelled by caller")]
    HarvestCancelled,
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::AuthRejected(msg) => SyncError::AuthFailure(msg),
            TransportError::Disconnected(msg) => SyncError::TransportDisconnected(msg),
            other => SyncError::Transport(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
