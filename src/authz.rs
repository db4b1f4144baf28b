//! The permission oracle.
//!
//! Answers "may principal P perform action A on target T?" from the global
//! role hierarchy plus the room-scoped role. The action set is closed. For
//! moderation actions the more permissive of the two roles wins; for content
//! actions the more restrictive wins. Room-state constraints (archived,
//! suspended) are enforced by the room actor at apply time, not here.

use chrono::{DateTime, Utc};

use crate::auth::{GlobalRole, Principal, PrincipalStatus};

/// The closed action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SendMessage,
    EditMessage,
    DeleteOwnMessage,
    DeleteAnyMessage,
    Pin,
    React,
    JoinRoom,
    CreateRoom,
    Invite,
    Kick,
    Ban,
    Mute,
    ModerateContent,
    ChangeRole,
    ReadHistory,
    UploadAttachment,
}

impl Action {
    /// Stable name for logs and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendMessage => "send-message",
            Action::EditMessage => "edit-message",
            Action::DeleteOwnMessage => "delete-own-message",
            Action::DeleteAnyMessage => "delete-any-message",
            Action::Pin => "pin",
            Action::React => "react",
            Action::JoinRoom => "join-room",
            Action::CreateRoom => "create-room",
            Action::Invite => "invite",
            Action::Kick => "kick",
            Action::Ban => "ban",
            Action::Mute => "mute",
            Action::ModerateContent => "moderate-content",
            Action::ChangeRole => "change-role",
            Action::ReadHistory => "read-history",
            Action::UploadAttachment => "upload-attachment",
        }
    }

    /// Moderation actions resolve roles permissively (max of global/room);
    /// everything else restrictively (min).
    pub fn is_moderation(&self) -> bool {
        matches!(
            self,
            Action::DeleteAnyMessage
                | Action::Pin
                | Action::Kick
                | Action::Ban
                | Action::Mute
                | Action::ModerateContent
                | Action::ChangeRole
        )
    }

    /// Minimum effective level required, independent of per-room thresholds.
    fn required_level(&self) -> u8 {
        match self {
            Action::ReadHistory => 0,
            Action::SendMessage
            | Action::EditMessage
            | Action::DeleteOwnMessage
            | Action::React
            | Action::JoinRoom
            | Action::CreateRoom
            | Action::Invite
            | Action::UploadAttachment => GlobalRole::User.level(),
            Action::DeleteAnyMessage
            | Action::Pin
            | Action::Kick
            | Action::Ban
            | Action::Mute
            | Action::ModerateContent => GlobalRole::Moderator.level(),
            Action::ChangeRole => GlobalRole::Admin.level(),
        }
    }

    /// Actions a muted member may not perform.
    fn blocked_when_muted(&self) -> bool {
        matches!(
            self,
            Action::SendMessage | Action::UploadAttachment | Action::React
        )
    }
}

/// Room-scoped role hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoomRole {
    Member,
    Moderator,
    Admin,
    Owner,
}

impl RoomRole {
    /// Numeric permission level, aligned with the global scale.
    pub fn level(&self) -> u8 {
        match self {
            RoomRole::Member => 10,
            RoomRole::Moderator => 50,
            RoomRole::Admin => 80,
            RoomRole::Owner => 100,
        }
    }

    /// Stable string form, matching the persisted column values.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomRole::Member => "member",
            RoomRole::Moderator => "moderator",
            RoomRole::Admin => "admin",
            RoomRole::Owner => "owner",
        }
    }

    /// Parse the persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "member" => RoomRole::Member,
            "moderator" => RoomRole::Moderator,
            "admin" => RoomRole::Admin,
            "owner" => RoomRole::Owner,
            _ => return None,
        })
    }
}

/// The caller's standing inside the target room, as seen by the oracle.
#[derive(Debug, Clone)]
pub struct MembershipView {
    pub role: RoomRole,
    pub can_write: bool,
    pub can_moderate: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub banned: bool,
}

impl MembershipView {
    /// Whether the member is muted at `now`.
    pub fn is_muted(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.is_some_and(|until| now < until)
    }

    /// Whether this member sees flagged content and redacted originals.
    pub fn is_room_staff(&self) -> bool {
        self.can_moderate || self.role >= RoomRole::Moderator
    }
}

/// The target of a permission check.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// The caller's membership in the room, when one exists.
    pub membership: Option<MembershipView>,
    /// The room's required-role threshold (0 when unset).
    pub required_level: u8,
    /// Whether the caller authored the message the action applies to.
    pub is_author: bool,
}

/// A denial, with the reason that is surfaced as `forbidden`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deny(pub &'static str);

impl std::fmt::Display for Deny {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Stateless policy evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionOracle;

impl PermissionOracle {
    /// Evaluate whether `principal` may perform `action` on `target`.
    pub fn check(
        &self,
        principal: &Principal,
        action: Action,
        target: &Target,
    ) -> Result<(), Deny> {
        if principal.status != PrincipalStatus::Active {
            return Err(Deny("account is not in good standing"));
        }

        if let Some(membership) = &target.membership {
            if membership.banned {
                return Err(Deny("banned from this room"));
            }
            if action.blocked_when_muted() && membership.is_muted(Utc::now()) {
                return Err(Deny("muted in this room"));
            }
        }

        // Author override: editing and deleting one's own message is always
        // permitted policy-wise; the edit window is enforced at apply time.
        if matches!(action, Action::EditMessage | Action::DeleteOwnMessage) {
            return if target.is_author {
                Ok(())
            } else {
                Err(Deny("only the author may do that"))
            };
        }

        let global_level = principal.role.level();
        let room_level = target.membership.as_ref().map(|m| m.role.level());

        let effective = match (action.is_moderation(), room_level) {
            // Moderation: the more permissive of the two roles wins, so a
            // global moderator can act in any room and a room owner can act
            // without a staff global role.
            (true, Some(room)) => global_level.max(room),
            (true, None) => global_level,
            // Content: the more restrictive wins.
            (false, Some(room)) => global_level.min(room),
            (false, None) => global_level,
        };

        // Membership-bound actions require one, except for global staff
        // reading history for moderation review.
        let needs_membership = matches!(
            action,
            Action::SendMessage
                | Action::React
                | Action::Invite
                | Action::UploadAttachment
                | Action::ReadHistory
        );
        if needs_membership && target.membership.is_none() && !principal.role.is_staff() {
            return Err(Deny("not a member of this room"));
        }

        if action == Action::SendMessage {
            if let Some(m) = &target.membership {
                if !m.can_write {
                    return Err(Deny("write access revoked in this room"));
                }
            }
        }

        let required = action.required_level().max(match action {
            Action::JoinRoom | Action::ReadHistory => target.required_level,
            _ => 0,
        });

        if effective >= required {
            Ok(())
        } else {
            Err(Deny("insufficient role for this action"))
        }
    }
}
