//! Inbound client commands.
//!
//! The decoder turns a raw frame into a [`ClientCommand`] — a closed
//! tagged-variant. Anything outside the set is rejected here with
//! `unsupported-command`, never deeper in the pipeline.

use serde::Deserialize;

use crate::error::DecodeError;
use crate::frame::Frame;
use crate::types::{Attachment, MessageKind, RoomTarget, TypingState};
use crate::MAX_FRAME_BYTES;

/// A decoded inbound frame: the command plus its correlation id.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    /// The typed command.
    pub command: ClientCommand,
    /// Client-chosen correlation id, echoed in the ack or error.
    pub correlation_id: Option<String>,
}

/// The closed set of client commands.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Late credential presentation, for transports that cannot set headers.
    Connect(ConnectData),
    /// Send a message (text or attachment-bearing) to a room.
    Message(SendMessage),
    /// Edit a previously sent message.
    Edit(EditMessage),
    /// Delete a message.
    Delete(DeleteMessage),
    /// Add or remove a reaction.
    React(ReactMessage),
    /// Pin or unpin a message.
    Pin(PinMessage),
    /// Join a room (optionally with password or invitation code).
    Join(JoinRoom),
    /// Leave a room.
    Leave(LeaveRoom),
    /// Start or stop a typing indicator.
    Typing(Typing),
    /// Advance the caller's last-read marker in a room.
    MarkRead(MarkRead),
    /// Subscribe this connection to a room's event stream.
    Subscribe(SubscribeRoom),
    /// Unsubscribe this connection from a room's event stream.
    Unsubscribe(SubscribeRoom),
    /// Client-initiated liveness probe.
    Ping,
    /// Client reply to a server `ping`.
    Pong,
}

impl ClientCommand {
    /// Stable command name for logging and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Connect(_) => "connect",
            ClientCommand::Message(_) => "message",
            ClientCommand::Edit(_) => "edit",
            ClientCommand::Delete(_) => "delete",
            ClientCommand::React(_) => "react",
            ClientCommand::Pin(_) => "pin",
            ClientCommand::Join(_) => "join",
            ClientCommand::Leave(_) => "leave",
            ClientCommand::Typing(_) => "typing",
            ClientCommand::MarkRead(_) => "mark-read",
            ClientCommand::Subscribe(_) => "subscribe",
            ClientCommand::Unsubscribe(_) => "unsubscribe",
            ClientCommand::Ping => "ping",
            ClientCommand::Pong => "pong",
        }
    }
}

/// Payload of `connect`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectData {
    /// Bearer token.
    pub token: String,
}

/// Payload of `message`.
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    /// Target room (id or slug).
    pub room: RoomTarget,
    /// Message body. May be empty for pure attachment messages.
    #[serde(default)]
    pub content: String,
    /// Message kind; defaults to `text`.
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    /// Parent message id, for threaded replies.
    #[serde(default)]
    pub reply_to: Option<i64>,
    /// Attachment references.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Payload of `edit`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditMessage {
    /// Room containing the message.
    pub room: RoomTarget,
    /// Per-room message id.
    pub message_id: i64,
    /// Replacement body.
    pub content: String,
}

/// Payload of `delete`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessage {
    /// Room containing the message.
    pub room: RoomTarget,
    /// Per-room message id.
    pub message_id: i64,
}

/// Payload of `react`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactMessage {
    /// Room containing the message.
    pub room: RoomTarget,
    /// Per-room message id.
    pub message_id: i64,
    /// Emoji, as sent by the client.
    pub emoji: String,
    /// When true, remove the caller's reaction instead of adding it.
    #[serde(default)]
    pub remove: bool,
}

/// Payload of `pin`.
#[derive(Debug, Clone, Deserialize)]
pub struct PinMessage {
    /// Room containing the message.
    pub room: RoomTarget,
    /// Per-room message id.
    pub message_id: i64,
    /// When true, unpin instead of pin.
    #[serde(default)]
    pub unpin: bool,
}

/// Payload of `join`.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoom {
    /// Target room (id or slug).
    pub room: RoomTarget,
    /// Plaintext password for password-protected rooms.
    #[serde(default)]
    pub password: Option<String>,
    /// Invitation code for invite-only rooms.
    #[serde(default)]
    pub invite_code: Option<String>,
}

/// Payload of `leave`.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRoom {
    /// Target room (id or slug).
    pub room: RoomTarget,
}

/// Payload of `typing`.
#[derive(Debug, Clone, Deserialize)]
pub struct Typing {
    /// Target room (id or slug).
    pub room: RoomTarget,
    /// Start or stop.
    pub state: TypingState,
}

/// Payload of `mark-read`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkRead {
    /// Target room (id or slug).
    pub room: RoomTarget,
    /// Highest message id the client has rendered.
    pub message_id: i64,
}

/// Payload of `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRoom {
    /// Target room (id or slug).
    pub room: RoomTarget,
}

impl ClientFrame {
    /// Decode a raw text frame into a typed command.
    ///
    /// Size is checked before any parsing so oversized frames cost nothing.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        if raw.len() > MAX_FRAME_BYTES {
            return Err(DecodeError::FrameTooLarge {
                actual: raw.len(),
                limit: MAX_FRAME_BYTES,
            });
        }

        let frame: Frame = serde_json::from_str(raw)?;
        let correlation_id = frame.id;

        fn payload<T: serde::de::DeserializeOwned>(
            kind: &str,
            data: serde_json::Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data).map_err(|cause| DecodeError::InvalidPayload {
                kind: kind.to_string(),
                cause,
            })
        }

        let command = match frame.kind.as_str() {
            "connect" => ClientCommand::Connect(payload("connect", frame.data)?),
            "message" => ClientCommand::Message(payload("message", frame.data)?),
            "edit" => ClientCommand::Edit(payload("edit", frame.data)?),
            "delete" => ClientCommand::Delete(payload("delete", frame.data)?),
            "react" => ClientCommand::React(payload("react", frame.data)?),
            "pin" => ClientCommand::Pin(payload("pin", frame.data)?),
            "join" => ClientCommand::Join(payload("join", frame.data)?),
            "leave" => ClientCommand::Leave(payload("leave", frame.data)?),
            "typing" => ClientCommand::Typing(payload("typing", frame.data)?),
            "mark-read" => ClientCommand::MarkRead(payload("mark-read", frame.data)?),
            "subscribe" => ClientCommand::Subscribe(payload("subscribe", frame.data)?),
            "unsubscribe" => ClientCommand::Unsubscribe(payload("unsubscribe", frame.data)?),
            "ping" => ClientCommand::Ping,
            "pong" => ClientCommand::Pong,
            other => return Err(DecodeError::UnsupportedCommand(other.to_string())),
        };

        Ok(Self {
            command,
            correlation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_message_with_slug_target() {
        let frame =
            ClientFrame::decode(r#"{"type":"message","data":{"room":"general","content":"hi"}}"#)
                .unwrap();
        match frame.command {
            ClientCommand::Message(m) => {
                assert_eq!(m.room, RoomTarget::Slug("general".into()));
                assert_eq!(m.content, "hi");
                assert_eq!(m.kind, MessageKind::Text);
                assert!(m.reply_to.is_none());
            }
            other => panic!("expected message, got {}", other.name()),
        }
    }

    #[test]
    fn decode_typing_start() {
        let frame =
            ClientFrame::decode(r#"{"type":"typing","data":{"room":7,"state":"start"}}"#).unwrap();
        match frame.command {
            ClientCommand::Typing(t) => {
                assert_eq!(t.room, RoomTarget::Id(7));
                assert_eq!(t.state, TypingState::Start);
            }
            other => panic!("expected typing, got {}", other.name()),
        }
    }

    #[test]
    fn decode_ping_without_data() {
        let frame = ClientFrame::decode(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame.command, ClientCommand::Ping));
    }

    #[test]
    fn unknown_type_is_unsupported_command() {
        let err = ClientFrame::decode(r#"{"type":"teleport","data":{}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCommand(ref k) if k == "teleport"));
    }

    #[test]
    fn bad_payload_is_invalid_payload() {
        let err = ClientFrame::decode(r#"{"type":"edit","data":{"room":1}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { ref kind, .. } if kind == "edit"));
    }

    #[test]
    fn oversized_frame_rejected_before_parse() {
        let huge = format!(
            r#"{{"type":"message","data":{{"room":1,"content":"{}"}}}}"#,
            "x".repeat(crate::MAX_FRAME_BYTES)
        );
        let err = ClientFrame::decode(&huge).unwrap_err();
        assert!(matches!(err, DecodeError::FrameTooLarge { .. }));
    }

    #[test]
    fn correlation_id_carried_through() {
        let frame = ClientFrame::decode(
            r#"{"type":"join","data":{"room":"general"},"id":"abc-123"}"#,
        )
        .unwrap();
        assert_eq!(frame.correlation_id.as_deref(), Some("abc-123"));
    }
}
