//! WhatsApp JID (Jabber ID) addressing.
//!
//! Conversations and contacts are keyed by JID. Individual users live on
//! `s.whatsapp.net` (or the legacy `c.us` used by web clients), groups on `g.us`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Known JID servers on WhatsApp
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const LEGACY_USER: &str = "c.us";
    pub const GROUP: &str = "g.us";
}

/// JID identifies a user, group or other entity.
///
/// Device-qualified JIDs (`user:device@server`) address one linked device of
/// an account; [`JID::to_non_ad`] strips the device so contacts from
/// different devices of the same account compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct JID {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl JID {
    /// Creates a new regular JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            device: 0,
        }
    }

    /// JID of an individual account identified by phone number.
    pub fn user(number: impl Into<String>) -> Self {
        Self::new(number, servers::DEFAULT_USER)
    }

    /// JID of a group conversation.
    pub fn group(id: impl Into<String>) -> Self {
        Self::new(id, servers::GROUP)
    }

    /// Returns a version of the JID without the device part.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }

    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Returns true for individual accounts on either user server.
    pub fn is_user(&self) -> bool {
        (self.server == servers::DEFAULT_USER || self.server == servers::LEGACY_USER)
            && !self.user.is_empty()
    }

    /// The raw phone number for individual accounts.
    pub fn phone_number(&self) -> Option<&str> {
        if self.is_user() {
            Some(self.user.as_str())
        } else {
            None
        }
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error type for JID parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse JID: {0}")]
pub struct ParseJIDError(pub String);

impl FromStr for JID {
    type Err = ParseJIDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((user_part, server)) = s.split_once('@') else {
            if s.is_empty() {
                return Err(ParseJIDError("empty JID".to_string()));
            }
            return Ok(JID::new("", s));
        };

        if server.is_empty() || server.contains('@') {
            return Err(ParseJIDError(format!("invalid server in {s:?}")));
        }

        let (user, device) = match user_part.split_once(':') {
            Some((user, device)) => {
                let device = device
                    .parse()
                    .map_err(|_| ParseJIDError(format!("invalid device in {s:?}")))?;
                (user, device)
            }
            None => (user_part, 0),
        };

        // Agent-qualified users (`user.agent`) keep only the bare user.
        let user = user.split_once('.').map_or(user, |(user, _agent)| user);

        Ok(JID {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl Serialize for JID {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JID {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: JID = "5511999991234@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "5511999991234");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 0);
        assert!(jid.is_user());
        assert!(!jid.is_group());
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: JID = "5511999991234:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device, 2);
        assert_eq!(jid.to_non_ad(), JID::user("5511999991234"));
    }

    #[test]
    fn test_parse_agent_jid() {
        let jid: JID = "5511999991234.0:1@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "5511999991234");
        assert_eq!(jid.device, 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<JID>().is_err());
        assert!("123@".parse::<JID>().is_err());
        assert!("123:x@s.whatsapp.net".parse::<JID>().is_err());
    }

    #[test]
    fn test_group_and_legacy_servers() {
        let group: JID = "120363041234567890@g.us".parse().unwrap();
        assert!(group.is_group());
        assert_eq!(group.phone_number(), None);

        let legacy: JID = "5511888885678@c.us".parse().unwrap();
        assert!(legacy.is_user());
        assert_eq!(legacy.phone_number(), Some("5511888885678"));
    }

    #[test]
    fn test_jid_to_string() {
        assert_eq!(JID::user("123").to_string(), "123@s.whatsapp.net");
        let jid = JID {
            user: "123".to_string(),
            device: 2,
            server: servers::DEFAULT_USER.to_string(),
        };
        assert_eq!(jid.to_string(), "123:2@s.whatsapp.net");
        assert_eq!(JID::new("", servers::GROUP).to_string(), "g.us");
    }

    #[test]
    fn test_serde_as_string() {
        let jid = JID::group("42");
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"42@g.us\"");
        let back: JID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
    }
}
