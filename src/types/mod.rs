//! Core types shared by the session manager, dispatcher and harvester.

mod chat;
mod events;
mod jid;
mod pairing;
mod session;

pub use chat::*;
pub use events::*;
pub use jid::*;
pub use pairing::*;
pub use session::*;
