//! Messaging transport abstraction.
//!
//! The sync core never speaks a wire protocol itself. It drives any
//! [`Transport`] that can pair a device, report authentication, list chats and
//! resolve contacts, and that pushes [`ConnectionUpdate`]s as they happen.

mod loopback;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{Chat, ContactInfo, Conversation, DisconnectReason, PairingPayload, JID};

pub use loopback::{AuthScript, LoopbackHandle, LoopbackTransport};

/// Unsolicited connection-state changes raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    /// The pairing code rotated before anyone scanned it.
    PairingRefreshed(PairingPayload),
    /// The phone scanned the code; credentials are being verified.
    PairingScanned,
    /// The connection dropped.
    Disconnected(DisconnectReason),
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("request timed out")]
    Timeout,
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the error means the connection itself is gone, as opposed to
    /// one request failing.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

/// Capability set the session manager consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh stream of connection updates. Only the most recent
    /// subscription receives updates.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionUpdate>;

    /// Open the connection and obtain the first pairing payload.
    async fn begin_pairing(&self) -> Result<PairingPayload, TransportError>;

    /// Wait until the account confirms the pairing. Returns the account JID.
    async fn await_authenticated(&self) -> Result<JID, TransportError>;

    /// Re-establish a dropped connection using the stored credentials.
    async fn reconnect(&self) -> Result<(), TransportError>;

    async fn list_conversations(&self) -> Result<Vec<Chat>, TransportError>;

    async fn resolve_contact(
        &self,
        conversation: &Conversation,
    ) -> Result<ContactInfo, TransportError>;

    /// Release the connection. Must be safe to call repeatedly.
    async fn close(&self);
}
