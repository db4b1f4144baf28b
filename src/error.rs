//! Unified error handling for palaverd.
//!
//! Every component surfaces failures as typed results; this module defines
//! the engine-wide taxonomy and its mapping onto client-visible error
//! envelopes. The Message Router is the only place that conversion happens
//! for the realtime surface; the HTTP layer maps the same taxonomy onto
//! status codes.

use palaver_proto::{DecodeError, ErrorCode, ErrorData};
use std::time::Duration;
use thiserror::Error;

use crate::auth::AuthError;
use crate::db::DbError;

/// Engine-wide error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid, expired, or revoked credentials. Closes the connection.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Known identity, disallowed action. Never retried.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist or is invisible to the caller.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Malformed input, oversized content, unknown command shape.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The frame type named a command outside the protocol.
    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    /// A quota was exhausted; carries the refill hint.
    #[error("rate limited")]
    RateLimited {
        /// How long until the bucket yields a token again.
        retry_after: Duration,
    },

    /// The moderation pipeline refused delivery.
    #[error("blocked by moderation: {0}")]
    ModeratedBlock(String),

    /// The operation conflicts with current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backing services exhausted their retry budget.
    #[error("temporarily unavailable")]
    Unavailable,

    /// The connection's outbound queue stayed full past the grace window.
    #[error("slow consumer")]
    SlowConsumer,

    /// Invariant violation or unreachable branch. Logged with full context;
    /// must never crash the process.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for router and room operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// The wire error code for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::UnsupportedCommand(_) => ErrorCode::UnsupportedCommand,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::ModeratedBlock(_) => ErrorCode::ModeratedBlock,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::Unavailable => ErrorCode::Unavailable,
            Self::SlowConsumer => ErrorCode::SlowConsumer,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether this failure should close the connection that caused it.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::SlowConsumer)
    }

    /// Render the client-visible error envelope payload.
    ///
    /// Internal detail is deliberately not leaked: `Internal` surfaces a
    /// generic message, the specifics stay in the logs.
    pub fn to_error_data(&self, correlation_id: Option<String>) -> ErrorData {
        let message = match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let mut data = ErrorData::new(self.error_code(), message);
        if let Self::RateLimited { retry_after } = self {
            data.retry_after_ms = Some(retry_after.as_millis().max(1) as u64);
        }
        data.correlation_id = correlation_id;
        data
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => Self::NotFound("entity"),
            DbError::Conflict(msg) => Self::Conflict(msg),
            DbError::ConstraintViolation(msg) => Self::Validation(msg),
            DbError::Unavailable => Self::Unavailable,
            DbError::Sqlx(e) => {
                tracing::error!(error = %e, "unexpected database error");
                Self::Unavailable
            }
        }
    }
}

impl From<DecodeError> for EngineError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedCommand(kind) => Self::UnsupportedCommand(kind),
            other => Self::Validation(other.to_string()),
        }
    }
}
