//! Conversation and contact records produced during a harvest.

use serde::{Deserialize, Serialize};

use crate::types::{SessionId, JID};

/// A chat thread as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub jid: JID,
    pub name: Option<String>,
    pub is_group: bool,
}

impl Chat {
    /// One-to-one chat with an individual account.
    pub fn individual(jid: JID, name: impl Into<String>) -> Self {
        Self {
            jid,
            name: Some(name.into()),
            is_group: false,
        }
    }

    /// Group chat.
    pub fn group(jid: JID, name: impl Into<String>) -> Self {
        Self {
            jid,
            name: Some(name.into()),
            is_group: true,
        }
    }
}

/// Read-only snapshot of a chat, bound to the session it was listed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub jid: JID,
    pub name: Option<String>,
    pub is_group: bool,
    pub session_id: SessionId,
}

impl Conversation {
    /// Stamp a transport chat with its session. A group JID marks the
    /// conversation as a group even if the transport flag disagrees.
    pub fn from_chat(chat: Chat, session_id: SessionId) -> Self {
        let is_group = chat.is_group || chat.jid.is_group();
        Self {
            jid: chat.jid,
            name: chat.name,
            is_group,
            session_id,
        }
    }
}

/// Raw contact data resolved for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub jid: JID,
    /// Name saved in the account's address book.
    pub full_name: Option<String>,
    /// Name the counterpart set for themselves.
    pub push_name: Option<String>,
    pub number: Option<String>,
}

impl ContactInfo {
    pub fn new(jid: JID) -> Self {
        Self {
            jid,
            ..Default::default()
        }
    }

    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = Some(name.into());
        self
    }

    pub fn with_push_name(mut self, name: impl Into<String>) -> Self {
        self.push_name = Some(name.into());
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// An individual counterpart extracted from a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: JID,
    pub display_name: String,
    pub phone: String,
    pub conversation: JID,
}

impl Contact {
    /// Resolve a contact, picking the display name from the saved name, then
    /// the push name, then the raw number. Blank candidates are skipped.
    pub fn resolve(info: ContactInfo, conversation: &Conversation) -> Self {
        let id = info.jid.to_non_ad();
        let phone = non_blank(info.number.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| id.phone_number().unwrap_or(&id.user).to_string());

        let display_name = non_blank(info.full_name.as_deref())
            .or_else(|| non_blank(info.push_name.as_deref()))
            .map(str::to_string)
            .unwrap_or_else(|| phone.clone());

        Self {
            id,
            display_name,
            phone,
            conversation: conversation.jid.clone(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
