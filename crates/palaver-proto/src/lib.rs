//! # palaver-proto
//!
//! Wire protocol for the Palaver chat engine.
//!
//! Frames are JSON objects of the shape `{"type": <string>, "data": <object>,
//! "id": <optional correlation id>}` exchanged over a persistent duplex
//! connection. This crate defines:
//!
//! - The closed set of client commands and their typed payloads
//! - Server-originated events (message broadcasts, presence, acks, errors)
//! - The error-code taxonomy shared by the realtime and HTTP surfaces
//!
//! Unknown frame types are rejected at the decoder boundary; the engine never
//! dispatches on raw strings past this crate.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod types;

pub use command::{ClientCommand, ClientFrame};
pub use error::{DecodeError, ErrorCode, ErrorData};
pub use event::{AckData, MessageEvent, PresenceData, RoomEventData, ServerEvent, TypingData};
pub use frame::Frame;
pub use types::{Attachment, MessageKind, RoomTarget, TypingState};

/// Maximum length of a text message body, in Unicode code points.
pub const MAX_TEXT_CODE_POINTS: usize = 10_000;

/// Maximum accepted size of a single inbound frame, in bytes.
///
/// Generous headroom above [`MAX_TEXT_CODE_POINTS`] worst-case UTF-8 plus
/// attachments metadata; anything larger is rejected before JSON parsing.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
