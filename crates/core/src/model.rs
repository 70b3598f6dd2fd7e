//! Session Data Model
//!
//! Typed identities, keys, and the records persisted in the remote store.
//! Connection and channel keys are structured pairs; they are never assembled
//! into, or parsed back out of, a concatenated string.

use crate::error::InvalidId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Characters the hosted store refuses in a path segment.
const FORBIDDEN_ID_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// A validated participant identifier, safe to use as a store path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Validates a raw identifier. Surrounding whitespace is trimmed first.
    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(InvalidId::Empty);
        }
        if let Some(c) = id
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_ID_CHARS.contains(c))
        {
            return Err(InvalidId::ForbiddenChar {
                id: id.to_string(),
                found: c,
            });
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ParticipantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A language code such as `en` or `es`, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LanguageCode {
    fn default() -> Self {
        Self::new("en")
    }
}

impl From<String> for LanguageCode {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one handshake: who asked, and whom they asked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub initiator: ParticipantId,
    pub target: ParticipantId,
}

impl ConnectionKey {
    pub fn new(initiator: ParticipantId, target: ParticipantId) -> Self {
        Self { initiator, target }
    }

    /// Returns the other side of the connection, if `id` is part of it.
    pub fn peer_of(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        if *id == self.initiator {
            Some(&self.target)
        } else if *id == self.target {
            Some(&self.initiator)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.initiator, self.target)
    }
}

/// A directional channel: messages spoken by `from`, addressed to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub from: ParticipantId,
    pub to: ParticipantId,
}

impl ChannelKey {
    pub fn new(from: ParticipantId, to: ParticipantId) -> Self {
        Self { from, to }
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.to.clone(), self.from.clone())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.from, self.to)
    }
}

/// Handshake and termination state shared by both participants.
///
/// Both flags only ever move from `false` to `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub terminate: bool,
}

/// One translated utterance appended to a channel. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Strictly increasing within the channel; the delivery order.
    pub seq: u64,
    pub sender: ParticipantId,
    pub original_text: String,
    pub translated_text: String,
    /// Language `translated_text` is written in. Older writers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_language: Option<LanguageCode>,
    /// Sender wall-clock time in fractional seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Current wall-clock time in fractional seconds, as stored in `Message::timestamp`.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// An established call between two participants.
#[derive(Debug, Clone)]
pub struct Session {
    pub self_id: ParticipantId,
    pub peer_id: ParticipantId,
    pub connection_key: ConnectionKey,
    /// The local participant's language.
    pub source_language: LanguageCode,
    /// The peer's language.
    pub target_language: LanguageCode,
    pub cancellation: CancellationToken,
}

impl Session {
    /// Channel this participant writes to.
    pub fn outbound_channel(&self) -> ChannelKey {
        ChannelKey::new(self.self_id.clone(), self.peer_id.clone())
    }

    /// Channel this participant reads from.
    pub fn inbound_channel(&self) -> ChannelKey {
        ChannelKey::new(self.peer_id.clone(), self.self_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    #[test]
    fn test_participant_id_trims_and_validates() {
        assert_eq!(id("  alice ").as_str(), "alice");
        assert!(matches!(ParticipantId::parse("   "), Err(InvalidId::Empty)));
        assert!(matches!(
            ParticipantId::parse("a/b"),
            Err(InvalidId::ForbiddenChar { found: '/', .. })
        ));
        assert!(ParticipantId::parse("bob smith").is_err());
        assert!(ParticipantId::parse("user_1-x").is_ok());
    }

    #[test]
    fn test_language_code_is_normalized() {
        assert_eq!(LanguageCode::new(" ES "), LanguageCode::new("es"));
        assert_eq!(LanguageCode::default().as_str(), "en");
    }

    #[test]
    fn test_peer_of_does_not_confuse_overlapping_ids() {
        // "ab" contains "a"; a structured key keeps them apart.
        let key = ConnectionKey::new(id("a"), id("ab"));
        assert_eq!(key.peer_of(&id("a")), Some(&id("ab")));
        assert_eq!(key.peer_of(&id("ab")), Some(&id("a")));
        assert_eq!(key.peer_of(&id("b")), None);
    }

    #[test]
    fn test_message_wire_format() {
        let message = Message {
            seq: 3,
            sender: id("A"),
            original_text: "hello".into(),
            translated_text: "hola".into(),
            translated_language: Some(LanguageCode::new("es")),
            timestamp: 12.5,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["originalText"], "hello");
        assert_eq!(json["translatedText"], "hola");
        assert_eq!(json["translatedLanguage"], "es");
        assert_eq!(json["sender"], "A");
        assert_eq!(json["seq"], 3);
    }

    #[test]
    fn test_message_without_language_still_decodes() {
        let json = serde_json::json!({
            "seq": 1,
            "sender": "B",
            "originalText": "hola",
            "translatedText": "hello",
            "timestamp": 1.0
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.translated_language, None);
    }

    #[test]
    fn test_message_rejects_invalid_sender() {
        let json = serde_json::json!({
            "seq": 1,
            "sender": "",
            "originalText": "x",
            "translatedText": "x",
            "timestamp": 1.0
        });
        assert!(serde_json::from_value::<Message>(json).is_err());
    }

    #[test]
    fn test_session_channels_are_mirrored() {
        let session = Session {
            self_id: id("A"),
            peer_id: id("B"),
            connection_key: ConnectionKey::new(id("A"), id("B")),
            source_language: LanguageCode::new("en"),
            target_language: LanguageCode::new("es"),
            cancellation: CancellationToken::new(),
        };
        assert_eq!(session.outbound_channel(), ChannelKey::new(id("A"), id("B")));
        assert_eq!(session.inbound_channel(), session.outbound_channel().reversed());
    }
}
