//! The JSON frame envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire envelope: `{"type": ..., "data": ..., "id": ...}`.
///
/// Both directions use this shape. `data` is absent (or `null`) for frames
/// that carry no payload, such as `ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type discriminator (kebab-case).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Optional client correlation id, echoed back in acks and errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Frame {
    /// Construct a frame with a payload.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            id: None,
        }
    }

    /// Construct a payload-less frame (e.g. `ping`).
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
            id: None,
        }
    }

    /// Serialize to the wire representation.
    ///
    /// Serialization of a well-formed frame cannot fail; a failure here is a
    /// programming error and is surfaced as such.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("frame serialization is infallible")
    }
}
