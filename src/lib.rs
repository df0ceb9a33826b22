//! wa-contact-sync: session-backed WhatsApp contact synchronization.
//!
//! Pairs a device with a messaging account, keeps the session alive across
//! drops, and harvests the individual contacts behind its open conversations.
//!
//! ## Modules
//!
//! - `types` - JIDs, conversations, contacts, session state and events
//! - `transport` - The messaging transport trait and an in-memory implementation
//! - `session` - Session lifecycle: pairing, authentication, reconnects
//! - `dispatch` - Ordered event delivery to subscribers
//! - `harvest` - Contact harvesting over a ready session
//! - `config` - Configuration management
//!
//! ```no_run
//! use std::sync::Arc;
//! use wa_contact_sync::{Harvester, LoopbackTransport, SessionManager, SyncConfig, SyncEvent};
//!
//! # async fn run() -> Result<(), wa_contact_sync::SyncError> {
//! let manager = SessionManager::new(SyncConfig::default(), Arc::new(LoopbackTransport::new()));
//! let mut events = manager.subscribe();
//! manager.start().await?;
//!
//! while let Some(event) = events.next().await {
//!     if event == SyncEvent::Authenticated {
//!         let report = Harvester::new(manager.clone()).harvest().await?;
//!         println!("{} contacts", report.count);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod harvest;
pub mod session;
pub mod transport;
pub mod types;

pub use config::SyncConfig;
pub use dispatch::{EventDispatcher, EventStream};
pub use error::{SyncError, SyncResult};
pub use harvest::{HarvestReport, Harvester};
pub use session::{Backoff, Session, SessionManager};
pub use transport::{
    AuthScript, ConnectionUpdate, LoopbackHandle, LoopbackTransport, Transport, TransportError,
};
pub use types::{
    Chat, Contact, ContactInfo, Conversation, DisconnectReason, PairingPayload, SessionId,
    SessionState, SyncEvent, JID,
};
