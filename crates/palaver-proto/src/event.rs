//! Server-originated events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ErrorData;
use crate::frame::Frame;
use crate::types::{Attachment, MessageKind};

/// A message as broadcast to room subscribers.
///
/// `flagged` is only serialized when true, and events with it set are only
/// ever delivered to moderator subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Per-room monotonic message id.
    pub id: i64,
    /// Room the message belongs to.
    pub room_id: i64,
    /// Author principal id. Absent for system messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
    /// Author display name at send time.
    pub author_name: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Body text (redacted for deleted messages).
    pub content: String,
    /// Server-assigned creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the message has been edited.
    #[serde(default)]
    pub is_edited: bool,
    /// Parent message id for threaded replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
    /// Attachment references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Set when the moderation pipeline flagged the message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flagged: bool,
}

/// Payload of the `ack` frame sent to the originating connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckData {
    /// Assigned per-room message id, when the command persisted a message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    /// Room the command applied to, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    /// Server timestamp of acceptance.
    pub timestamp: DateTime<Utc>,
    /// Echo of the client correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Payload of a `presence` delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceData {
    /// The principal whose presence changed.
    pub principal_id: i64,
    /// Display name of that principal.
    pub display_name: String,
    /// `true` when they came online, `false` when fully offline.
    pub online: bool,
}

/// Payload of a `typing` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingData {
    /// Room where the indicator applies.
    pub room_id: i64,
    /// The typing principal.
    pub principal_id: i64,
    /// Display name of that principal.
    pub display_name: String,
    /// `true` for start/refresh, `false` for stop/expiry.
    pub typing: bool,
}

/// Payload of a `room-event` broadcast (joins, leaves, kicks, pins, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEventData {
    /// Room the event applies to.
    pub room_id: i64,
    /// Event kind (kebab-case: `member-joined`, `member-left`, `member-kicked`,
    /// `member-banned`, `member-muted`, `role-changed`, `message-pinned`,
    /// `message-unpinned`, `ownership-transferred`, `room-archived`, ...).
    pub event: String,
    /// Principal the event is about, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<i64>,
    /// Free-form event details.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// All server-originated frames.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// New message broadcast.
    Message(MessageEvent),
    /// A message was edited.
    MessageEdited(MessageEvent),
    /// A message was deleted; `content` is already redacted.
    MessageDeleted {
        /// Room containing the deleted message.
        room_id: i64,
        /// Per-room id of the deleted message.
        message_id: i64,
    },
    /// Reaction added or removed.
    Reaction {
        /// Room containing the message.
        room_id: i64,
        /// Per-room message id.
        message_id: i64,
        /// Reacting principal.
        principal_id: i64,
        /// The emoji.
        emoji: String,
        /// `true` when added, `false` when removed.
        added: bool,
    },
    /// Presence delta.
    Presence(PresenceData),
    /// Typing indicator delta.
    Typing(TypingData),
    /// Room lifecycle / membership event.
    RoomEvent(RoomEventData),
    /// Command acknowledgement.
    Ack(AckData),
    /// Error envelope.
    Error(ErrorData),
    /// Server liveness probe.
    Ping,
    /// Reply to a client `ping`.
    Pong,
}

impl ServerEvent {
    /// Frame type string for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => "message",
            ServerEvent::MessageEdited(_) => "message-edited",
            ServerEvent::MessageDeleted { .. } => "message-deleted",
            ServerEvent::Reaction { .. } => "reaction",
            ServerEvent::Presence(_) => "presence",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::RoomEvent(_) => "room-event",
            ServerEvent::Ack(_) => "ack",
            ServerEvent::Error(_) => "error",
            ServerEvent::Ping => "ping",
            ServerEvent::Pong => "pong",
        }
    }

    /// Render to the wire envelope.
    ///
    /// Borrows so a shared event (`Arc<ServerEvent>` on fan-out) can be
    /// rendered once per subscriber without cloning the event itself.
    pub fn to_frame(&self) -> Frame {
        let kind = self.kind();
        let data = match self {
            ServerEvent::Message(m) | ServerEvent::MessageEdited(m) => {
                serde_json::to_value(m).expect("event serialization is infallible")
            }
            ServerEvent::MessageDeleted {
                room_id,
                message_id,
            } => json!({ "room_id": room_id, "message_id": message_id }),
            ServerEvent::Reaction {
                room_id,
                message_id,
                principal_id,
                emoji,
                added,
            } => json!({
                "room_id": room_id,
                "message_id": message_id,
                "principal_id": principal_id,
                "emoji": emoji,
                "added": added,
            }),
            ServerEvent::Presence(p) => {
                serde_json::to_value(p).expect("event serialization is infallible")
            }
            ServerEvent::Typing(t) => {
                serde_json::to_value(t).expect("event serialization is infallible")
            }
            ServerEvent::RoomEvent(e) => {
                serde_json::to_value(e).expect("event serialization is infallible")
            }
            ServerEvent::Ack(a) => {
                serde_json::to_value(a).expect("event serialization is infallible")
            }
            ServerEvent::Error(e) => {
                serde_json::to_value(e).expect("event serialization is infallible")
            }
            ServerEvent::Ping | ServerEvent::Pong => serde_json::Value::Null,
        };
        Frame::new(kind, data)
    }

    /// Render straight to the wire string.
    pub fn to_json(&self) -> String {
        self.to_frame().to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ErrorData};

    fn sample_message() -> MessageEvent {
        MessageEvent {
            id: 42,
            room_id: 1,
            author_id: Some(7),
            author_name: "alice".into(),
            kind: MessageKind::Text,
            content: "hi".into(),
            timestamp: DateTime::parse_from_rfc3339("2026-02-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            is_edited: false,
            reply_to: None,
            attachments: Vec::new(),
            flagged: false,
        }
    }

    #[test]
    fn message_event_frame_shape() {
        let frame = ServerEvent::Message(sample_message()).to_frame();
        assert_eq!(frame.kind, "message");
        assert_eq!(frame.data["id"], 42);
        assert_eq!(frame.data["room_id"], 1);
        assert_eq!(frame.data["author_id"], 7);
        assert_eq!(frame.data["type"], "text");
        // Clean messages never leak a `flagged` key.
        assert!(frame.data.get("flagged").is_none());
    }

    #[test]
    fn flagged_message_serializes_flag() {
        let mut msg = sample_message();
        msg.flagged = true;
        let frame = ServerEvent::Message(msg).to_frame();
        assert_eq!(frame.data["flagged"], true);
    }

    #[test]
    fn pong_has_no_payload() {
        assert_eq!(ServerEvent::Pong.to_json(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn error_frame_carries_code() {
        let ev = ServerEvent::Error(ErrorData::new(ErrorCode::RateLimited, "slow down"));
        let frame = ev.to_frame();
        assert_eq!(frame.kind, "error");
        assert_eq!(frame.data["code"], "rate-limited");
    }

    #[test]
    fn system_message_has_no_author_id() {
        let mut msg = sample_message();
        msg.author_id = None;
        msg.kind = MessageKind::System;
        let frame = ServerEvent::Message(msg).to_frame();
        assert!(frame.data.get("author_id").is_none());
        assert_eq!(frame.data["type"], "system");
    }
}
