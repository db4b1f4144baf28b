//! Shared wire types used by both commands and events.

use serde::{Deserialize, Serialize};

/// A reference to a room as it appears on the wire.
///
/// Clients may address a room either by its numeric id or by its
/// human-readable slug; the engine resolves slugs to ids at the routing
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomTarget {
    /// Numeric room id.
    Id(i64),
    /// Human-readable room slug (e.g. `"general"`).
    Slug(String),
}

impl std::fmt::Display for RoomTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomTarget::Id(id) => write!(f, "{id}"),
            RoomTarget::Slug(slug) => f.write_str(slug),
        }
    }
}

/// The kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text utterance.
    #[default]
    Text,
    /// Image attachment message.
    Image,
    /// Generic file attachment message.
    File,
    /// Audio attachment message.
    Audio,
    /// Video attachment message.
    Video,
    /// Server-generated message with no user author.
    System,
    /// Slash-command style message.
    Command,
    /// Reaction carrier (rarely used as a standalone message).
    Reaction,
}

impl MessageKind {
    /// Stable string form, matching the persisted column values.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::System => "system",
            MessageKind::Command => "command",
            MessageKind::Reaction => "reaction",
        }
    }

    /// Parse the persisted column value back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "file" => MessageKind::File,
            "audio" => MessageKind::Audio,
            "video" => MessageKind::Video,
            "system" => MessageKind::System,
            "command" => MessageKind::Command,
            "reaction" => MessageKind::Reaction,
            _ => return None,
        })
    }
}

/// An attachment reference carried by a message.
///
/// Attachment bytes live in external object storage; only the opaque URL and
/// descriptive metadata travel through the chat engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Opaque storage URL.
    pub url: String,
    /// Original file name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Size in bytes, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Typing indicator state carried by the `typing` client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingState {
    /// The principal started (or refreshed) typing.
    Start,
    /// The principal stopped typing.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_target_untagged_roundtrip() {
        let id: RoomTarget = serde_json::from_str("17").unwrap();
        assert_eq!(id, RoomTarget::Id(17));

        let slug: RoomTarget = serde_json::from_str("\"general\"").unwrap();
        assert_eq!(slug, RoomTarget::Slug("general".into()));
    }

    #[test]
    fn message_kind_str_roundtrip() {
        for kind in [
            MessageKind::Text,
            MessageKind::Image,
            MessageKind::File,
            MessageKind::Audio,
            MessageKind::Video,
            MessageKind::System,
            MessageKind::Command,
            MessageKind::Reaction,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("sticker"), None);
    }
}
