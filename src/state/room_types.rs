//! Room actor command surface and operation errors.

use palaver_proto::{Attachment, MessageKind, ServerEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::ConnId;
use crate::auth::Principal;
use crate::authz::RoomRole;
use crate::db::{DbError, MembershipRecord, RoomRecord};
use crate::error::EngineError;

/// Room operation errors.
///
/// Room-state failures mapped by the router onto the client-visible
/// taxonomy.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("not a member of this room")]
    NotMember,

    #[error("banned from this room")]
    Banned,

    #[error("muted in this room")]
    Muted,

    #[error("room is read-only")]
    ReadOnly,

    #[error("room is suspended")]
    Suspended,

    #[error("room not found")]
    RoomGone,

    #[error("room is full")]
    RoomFull,

    #[error("wrong password")]
    BadPassword,

    #[error("an invitation is required")]
    InviteRequired,

    #[error("invitation is not valid")]
    InvalidInvite,

    #[error("conversation is blocked")]
    Blocked,

    #[error("already a member")]
    AlreadyMember,

    #[error("the owner must transfer ownership before leaving")]
    OwnerCannotLeave,

    #[error("target is not a member")]
    TargetNotMember,

    #[error("the owner cannot be targeted")]
    CannotTargetOwner,

    #[error("the edit window has closed")]
    EditWindowExpired,

    #[error("only the author may do that")]
    NotAuthor,

    #[error("system messages cannot be modified")]
    SystemMessage,

    #[error("message not found")]
    MessageGone,

    #[error("insufficient role: {0}")]
    Denied(&'static str),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl RoomError {
    /// Static error code string for metrics labeling.
    #[inline]
    #[allow(dead_code)] // Available for future metrics integration
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotMember => "not_member",
            Self::Banned => "banned",
            Self::Muted => "muted",
            Self::ReadOnly => "read_only",
            Self::Suspended => "suspended",
            Self::RoomGone => "room_gone",
            Self::RoomFull => "room_full",
            Self::BadPassword => "bad_password",
            Self::InviteRequired => "invite_required",
            Self::InvalidInvite => "invalid_invite",
            Self::Blocked => "blocked",
            Self::AlreadyMember => "already_member",
            Self::OwnerCannotLeave => "owner_cannot_leave",
            Self::TargetNotMember => "target_not_member",
            Self::CannotTargetOwner => "cannot_target_owner",
            Self::EditWindowExpired => "edit_window_expired",
            Self::NotAuthor => "not_author",
            Self::SystemMessage => "system_message",
            Self::MessageGone => "message_gone",
            Self::Denied(_) => "denied",
            Self::Db(_) => "db_error",
        }
    }
}

impl From<RoomError> for EngineError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::RoomGone => EngineError::NotFound("room"),
            RoomError::MessageGone => EngineError::NotFound("message"),
            RoomError::RoomFull => EngineError::Conflict("room is full".into()),
            RoomError::AlreadyMember => EngineError::Conflict("already a member".into()),
            RoomError::OwnerCannotLeave => {
                EngineError::Conflict("transfer ownership before leaving".into())
            }
            RoomError::Db(db) => db.into(),
            forbidden => EngineError::Forbidden(forbidden.to_string()),
        }
    }
}

/// A live subscription of one connection to one room.
///
/// Whether the subscriber sees staff-only events is derived at broadcast
/// time from this flag plus their current room role, so role changes take
/// effect immediately.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub conn_id: ConnId,
    pub principal_id: i64,
    /// Global role is moderator or above.
    pub global_staff: bool,
    pub tx: mpsc::Sender<Arc<ServerEvent>>,
}

/// Parameters for posting a message through the actor.
#[derive(Debug)]
pub struct PostParams {
    pub principal: Principal,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to: Option<i64>,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<i64>,
    /// Set when the moderation pipeline flagged the content.
    pub flagged: bool,
    pub flag_reason: Option<String>,
    /// The originating connection, excluded from the broadcast (it gets the
    /// ack instead).
    pub origin: Option<ConnId>,
}

/// What the actor returns for an accepted post.
#[derive(Debug, Clone)]
pub struct PostReceipt {
    /// Assigned per-room message id.
    pub message_id: i64,
    /// Server timestamp (unix millis).
    pub created_at: i64,
    pub flagged: bool,
}

/// One mutable room setting, applied by the actor write-through.
#[derive(Debug, Clone)]
pub enum SettingsChange {
    /// Set or clear the topic.
    Topic(Option<String>),
    /// Set a join password (switches privacy to `password`) or clear it
    /// (back to `public`). Carries the plaintext; hashing happens at apply
    /// time.
    Password(Option<String>),
    /// Change the member cap.
    MaxMembers(i64),
    /// Change the required-role threshold.
    RequiredLevel(i64),
}

/// Room metadata the router needs before consulting the oracle.
#[derive(Debug, Clone)]
pub struct RoomDescription {
    pub record: RoomRecord,
    /// The asking principal's active membership, if any.
    pub membership: Option<MembershipRecord>,
}

/// Commands processed sequentially by a room actor.
///
/// The actor is the single owner of per-room mutable state; every operation
/// validates the transition, writes through persistence, then publishes a
/// room event to subscribers.
pub enum RoomCommand {
    Describe {
        principal_id: i64,
        reply: oneshot::Sender<RoomDescription>,
    },
    Subscribe {
        subscriber: Subscriber,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unsubscribe {
        conn_id: ConnId,
    },
    /// Remove every subscription of a closing connection.
    ConnectionClosed {
        conn_id: ConnId,
    },
    Post {
        params: Box<PostParams>,
        reply: oneshot::Sender<Result<PostReceipt, RoomError>>,
    },
    Edit {
        principal_id: i64,
        message_id: i64,
        content: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Delete {
        principal_id: i64,
        message_id: i64,
        /// True when authorized through `delete-any-message`.
        as_moderator: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    React {
        principal: Principal,
        message_id: i64,
        emoji: String,
        remove: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Pin {
        principal_id: i64,
        message_id: i64,
        unpin: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Join {
        principal: Principal,
        password: Option<String>,
        invite_code: Option<String>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        principal_id: i64,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Kick {
        actor_id: i64,
        target_id: i64,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Ban {
        actor_id: i64,
        target_id: i64,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unban {
        actor_id: i64,
        target_id: i64,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Mute {
        actor_id: i64,
        target_id: i64,
        duration_secs: i64,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Unmute {
        actor_id: i64,
        target_id: i64,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    ChangeRole {
        actor_id: i64,
        target_id: i64,
        role: RoomRole,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    TransferOwnership {
        actor_id: i64,
        target_id: i64,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Archive (owner/admin) or suspend/delete (global staff).
    SetStatus {
        actor: Principal,
        status: crate::db::RoomStatus,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    UpdateSettings {
        actor_id: i64,
        change: SettingsChange,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Block or unblock a direct conversation.
    SetBlocked {
        principal_id: i64,
        blocked: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    MarkRead {
        principal_id: i64,
        message_id: i64,
    },
    /// Fan an already-built event out to subscribers.
    Broadcast {
        event: Arc<ServerEvent>,
        staff_only: bool,
        exclude: Option<ConnId>,
    },
    /// Mute expiry sweep notification (from the maintenance task).
    MuteExpired {
        principal_id: i64,
    },
}
