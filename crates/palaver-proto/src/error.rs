//! Error codes and decode errors for the wire protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-visible error codes.
///
/// This is the complete taxonomy surfaced over both the realtime and HTTP
/// interfaces; the engine maps every internal failure onto exactly one of
/// these before it leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Invalid, expired, or revoked credentials.
    Unauthenticated,
    /// Known identity, disallowed action.
    Forbidden,
    /// Referenced entity does not exist (or is invisible to the caller).
    NotFound,
    /// A quota was exhausted; retry after the carried hint.
    RateLimited,
    /// The moderation pipeline refused the content.
    ModeratedBlock,
    /// The moderation pipeline accepted but flagged the content.
    ModeratedFlag,
    /// The frame type is not part of the protocol.
    UnsupportedCommand,
    /// Malformed or oversized input.
    ValidationFailed,
    /// The operation conflicts with current state.
    Conflict,
    /// A backing service is temporarily unavailable.
    Unavailable,
    /// The connection could not keep up with its outbound queue.
    SlowConsumer,
    /// Invariant violation or unreachable branch; logged server-side.
    Internal,
}

impl ErrorCode {
    /// Stable kebab-case string form (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not-found",
            ErrorCode::RateLimited => "rate-limited",
            ErrorCode::ModeratedBlock => "moderated-block",
            ErrorCode::ModeratedFlag => "moderated-flag",
            ErrorCode::UnsupportedCommand => "unsupported-command",
            ErrorCode::ValidationFailed => "validation-failed",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::SlowConsumer => "slow-consumer",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a server `error` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable explanation.
    pub message: String,
    /// For `rate-limited`: how long to wait before retrying, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Echo of the client correlation id, when the failing frame carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ErrorData {
    /// Construct an error payload with no retry hint or correlation id.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_ms: None,
            correlation_id: None,
        }
    }
}

/// Failures while decoding an inbound client frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame exceeded the maximum allowed size.
    #[error("frame of {actual} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Observed size in bytes.
        actual: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The frame was not valid JSON or did not match the envelope shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` field named a command outside the closed set.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// The `data` payload did not match the command's schema.
    #[error("invalid payload for `{kind}`: {cause}")]
    InvalidPayload {
        /// The frame type whose payload failed to decode.
        kind: String,
        /// The underlying serde error.
        cause: serde_json::Error,
    },
}

impl DecodeError {
    /// The error code this decode failure surfaces as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::UnsupportedCommand(_) => ErrorCode::UnsupportedCommand,
            DecodeError::FrameTooLarge { .. }
            | DecodeError::Malformed(_)
            | DecodeError::InvalidPayload { .. } => ErrorCode::ValidationFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"rate-limited\"");
        let json = serde_json::to_string(&ErrorCode::ModeratedBlock).unwrap();
        assert_eq!(json, "\"moderated-block\"");
    }

    #[test]
    fn error_data_omits_empty_optionals() {
        let data = ErrorData::new(ErrorCode::Forbidden, "no");
        let json = serde_json::to_string(&data).unwrap();
        assert!(!json.contains("retry_after_ms"));
        assert!(!json.contains("correlation_id"));
    }

    #[test]
    fn as_str_matches_serde() {
        for code in [
            ErrorCode::Unauthenticated,
            ErrorCode::Forbidden,
            ErrorCode::NotFound,
            ErrorCode::RateLimited,
            ErrorCode::ModeratedBlock,
            ErrorCode::ModeratedFlag,
            ErrorCode::UnsupportedCommand,
            ErrorCode::ValidationFailed,
            ErrorCode::Conflict,
            ErrorCode::Unavailable,
            ErrorCode::SlowConsumer,
            ErrorCode::Internal,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
