//! Sync channels.
//!
//! A channel is a named partition of the sync log. Simple channels name a
//! whole table (`reference`, `user`), scoped channels carry parameters
//! (`patient/<patientId>/encounter`).

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum length of a channel name in bytes.
pub const MAX_CHANNEL_LEN: usize = 255;

/// Name taken by the change query route (`POST /v1/sync/channels`).
pub const RESERVED_CHANNEL: &str = "channels";

/// Parameters captured by [`Channel::matches`], keyed by name without the `:`.
pub type ChannelParams = BTreeMap<String, String>;

/// A validated channel name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(String);

impl Channel {
    /// Parses and validates a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidChannel`] when the name is empty, too
    /// long, has an empty segment, contains characters outside
    /// `[A-Za-z0-9_.-]` and `/`, or is [`RESERVED_CHANNEL`].
    pub fn parse(name: &str) -> ProtocolResult<Self> {
        if name.is_empty() {
            return Err(ProtocolError::channel(name, "empty"));
        }
        if name == RESERVED_CHANNEL {
            return Err(ProtocolError::channel(name, "reserved"));
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(ProtocolError::channel(name, "too long"));
        }
        for segment in name.split('/') {
            if segment.is_empty() {
                return Err(ProtocolError::channel(name, "empty segment"));
            }
            if !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
            {
                return Err(ProtocolError::channel(name, "illegal character"));
            }
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `/`-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns the first segment, which names the record type.
    #[must_use]
    pub fn root(&self) -> &str {
        self.segments().next().unwrap_or(&self.0)
    }

    /// Matches this channel against a route pattern such as
    /// `patient/:patientId/encounter`.
    ///
    /// Returns the captured parameters, or `None` if the channel doesn't fit.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> Option<ChannelParams> {
        let mut params = ChannelParams::new();
        let mut actual = self.segments();
        for expected in pattern.split('/') {
            let segment = actual.next()?;
            if let Some(name) = expected.strip_prefix(':') {
                params.insert(name.to_string(), segment.to_string());
            } else if expected != segment {
                return None;
            }
        }
        if actual.next().is_some() {
            return None;
        }
        Some(params)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Channel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Channel::parse(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_and_scoped_channels() {
        assert_eq!(Channel::parse("reference").unwrap().as_str(), "reference");

        let scoped = Channel::parse("patient/8a1f-22/encounter").unwrap();
        assert_eq!(scoped.segments().count(), 3);
        assert_eq!(scoped.root(), "patient");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["", "/patient", "patient/", "patient//encounter", "pat ient", "a?b"] {
            assert!(Channel::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(Channel::parse(&"a".repeat(MAX_CHANNEL_LEN + 1)).is_err());
    }

    #[test]
    fn change_query_name_is_reserved() {
        assert!(matches!(
            Channel::parse(RESERVED_CHANNEL),
            Err(ProtocolError::InvalidChannel { reason: "reserved", .. })
        ));
        assert!(serde_json::from_str::<Channel>("\"channels\"").is_err());
        assert!(Channel::parse("channels/audit").is_ok());
        assert!(Channel::parse("reference/channels").is_ok());
    }

    #[test]
    fn pattern_matching_captures_params() {
        let channel = Channel::parse("patient/abc/encounter").unwrap();

        let params = channel.matches("patient/:patientId/encounter").unwrap();
        assert_eq!(params.get("patientId").map(String::as_str), Some("abc"));

        assert!(channel.matches("patient/:patientId").is_none());
        assert!(channel.matches("patient/:patientId/encounter/:id").is_none());
        assert!(channel.matches("user/:id/encounter").is_none());
    }

    #[test]
    fn serde_validates() {
        let channel: Channel = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(channel.as_str(), "user");
        assert!(serde_json::from_str::<Channel>("\"bad//name\"").is_err());
    }
}
