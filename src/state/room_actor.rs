//! The per-room actor.
//!
//! Each room's mutable state lives in exactly one Tokio task with an mpsc
//! mailbox; operations are processed strictly in arrival order, which is
//! what gives every subscriber the same total message order. The actor
//! validates each transition, writes through the persistence layer, then
//! fans the resulting event out with `try_send` so one slow subscriber can
//! never stall the room.

use chrono::Utc;
use im::HashMap as ImHashMap;
use palaver_proto::{MessageEvent, RoomEventData, ServerEvent};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::room_types::{
    PostParams, PostReceipt, RoomCommand, RoomDescription, RoomError, SettingsChange, Subscriber,
};
use super::{ConnId, Hub};
use crate::auth::{GlobalRole, Principal};
use crate::authz::RoomRole;
use crate::db::{
    Database, DbError, DirectConversation, MembershipRecord, MessageRecord, NewMessage,
    RoomRecord, RoomStatus, RoomType, with_retry,
};

/// Mailbox capacity per room actor.
pub const MAILBOX_CAPACITY: usize = 256;

/// The room actor. Owns the state of a single room and processes commands
/// sequentially.
pub struct RoomActor {
    record: RoomRecord,
    members: ImHashMap<i64, MembershipRecord>,
    subscribers: HashMap<ConnId, Subscriber>,
    pinned: Vec<i64>,
    /// Present for rooms of type `direct`.
    direct: Option<DirectConversation>,
    db: Database,
    hub: Weak<Hub>,
}

impl RoomActor {
    /// Spawn the actor task for a loaded room. Returns its mailbox.
    pub fn spawn(
        record: RoomRecord,
        members: Vec<MembershipRecord>,
        pinned: Vec<i64>,
        direct: Option<DirectConversation>,
        db: Database,
        hub: Weak<Hub>,
    ) -> mpsc::Sender<RoomCommand> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let members = members
            .into_iter()
            .map(|m| (m.principal_id, m))
            .collect::<ImHashMap<i64, MembershipRecord>>();

        let actor = Self {
            record,
            members,
            subscribers: HashMap::new(),
            pinned,
            direct,
            db,
            hub,
        };

        crate::metrics::ACTIVE_ROOMS.inc();
        tokio::spawn(async move {
            actor.run(rx).await;
        });
        tx
    }

    /// The main actor loop.
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle_command(command).await;
        }
        crate::metrics::ACTIVE_ROOMS.dec();
        debug!(room = self.record.id, "room actor stopped");
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Describe { principal_id, reply } => {
                let _ = reply.send(RoomDescription {
                    record: self.record.clone(),
                    membership: self.members.get(&principal_id).cloned(),
                });
            }
            RoomCommand::Subscribe { subscriber, reply } => {
                let _ = reply.send(self.handle_subscribe(subscriber));
            }
            RoomCommand::Unsubscribe { conn_id } | RoomCommand::ConnectionClosed { conn_id } => {
                self.subscribers.remove(&conn_id);
            }
            RoomCommand::Post { params, reply } => {
                let _ = reply.send(self.handle_post(*params).await);
            }
            RoomCommand::Edit {
                principal_id,
                message_id,
                content,
                reply,
            } => {
                let _ = reply.send(self.handle_edit(principal_id, message_id, content).await);
            }
            RoomCommand::Delete {
                principal_id,
                message_id,
                as_moderator,
                reply,
            } => {
                let _ = reply.send(
                    self.handle_delete(principal_id, message_id, as_moderator)
                        .await,
                );
            }
            RoomCommand::React {
                principal,
                message_id,
                emoji,
                remove,
                reply,
            } => {
                let _ = reply.send(self.handle_react(principal, message_id, emoji, remove).await);
            }
            RoomCommand::Pin {
                principal_id,
                message_id,
                unpin,
                reply,
            } => {
                let _ = reply.send(self.handle_pin(principal_id, message_id, unpin).await);
            }
            RoomCommand::Join {
                principal,
                password,
                invite_code,
                reply,
            } => {
                let _ = reply.send(self.handle_join(principal, password, invite_code).await);
            }
            RoomCommand::Leave { principal_id, reply } => {
                let _ = reply.send(self.handle_leave(principal_id).await);
            }
            RoomCommand::Kick {
                actor_id,
                target_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.handle_remove_member(actor_id, target_id, reason, false).await);
            }
            RoomCommand::Ban {
                actor_id,
                target_id,
                reason,
                reply,
            } => {
                let _ = reply.send(self.handle_remove_member(actor_id, target_id, reason, true).await);
            }
            RoomCommand::Unban {
                actor_id,
                target_id,
                reply,
            } => {
                let _ = reply.send(self.handle_unban(actor_id, target_id).await);
            }
            RoomCommand::Mute {
                actor_id,
                target_id,
                duration_secs,
                reply,
            } => {
                let _ = reply.send(self.handle_mute(actor_id, target_id, Some(duration_secs)).await);
            }
            RoomCommand::Unmute {
                actor_id,
                target_id,
                reply,
            } => {
                let _ = reply.send(self.handle_mute(actor_id, target_id, None).await);
            }
            RoomCommand::ChangeRole {
                actor_id,
                target_id,
                role,
                reply,
            } => {
                let _ = reply.send(self.handle_change_role(actor_id, target_id, role).await);
            }
            RoomCommand::TransferOwnership {
                actor_id,
                target_id,
                reply,
            } => {
                let _ = reply.send(self.handle_transfer(actor_id, target_id).await);
            }
            RoomCommand::SetStatus { actor, status, reply } => {
                let _ = reply.send(self.handle_set_status(actor, status).await);
            }
            RoomCommand::UpdateSettings { actor_id, change, reply } => {
                let _ = reply.send(self.handle_update_settings(actor_id, change).await);
            }
            RoomCommand::SetBlocked {
                principal_id,
                blocked,
                reply,
            } => {
                let _ = reply.send(self.handle_set_blocked(principal_id, blocked).await);
            }
            RoomCommand::MarkRead {
                principal_id,
                message_id,
            } => {
                if let Some(member) = self.members.get_mut(&principal_id) {
                    member.last_read_id = member.last_read_id.max(message_id);
                    let db = self.db.clone();
                    let room_id = self.record.id;
                    // Fire-and-forget; the marker is client-progress state.
                    tokio::spawn(async move {
                        let _ = db
                            .memberships()
                            .set_last_read(room_id, principal_id, message_id)
                            .await;
                    });
                }
            }
            RoomCommand::Broadcast {
                event,
                staff_only,
                exclude,
            } => {
                self.broadcast(event, staff_only, exclude);
            }
            RoomCommand::MuteExpired { principal_id } => {
                if let Some(member) = self.members.get_mut(&principal_id) {
                    member.muted_until = None;
                    self.publish_room_event("member-unmuted", Some(principal_id), serde_json::Value::Null);
                }
            }
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    fn subscriber_is_staff(&self, sub: &Subscriber) -> bool {
        sub.global_staff
            || self
                .members
                .get(&sub.principal_id)
                .map(|m| m.view().is_room_staff())
                .unwrap_or(false)
    }

    /// Deliver an event to subscribers. Per-subscriber failures are
    /// isolated: a full queue marks that connection for slow-consumer
    /// evaluation, a closed one is dropped, and the loop carries on.
    fn broadcast(&mut self, event: Arc<ServerEvent>, staff_only: bool, exclude: Option<ConnId>) {
        let mut dead = Vec::new();
        for sub in self.subscribers.values() {
            if Some(sub.conn_id) == exclude {
                continue;
            }
            if staff_only && !self.subscriber_is_staff(sub) {
                continue;
            }
            match sub.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    crate::metrics::EVENTS_BROADCAST.inc();
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    crate::metrics::BROADCAST_DROPS.inc();
                    if let Some(hub) = self.hub.upgrade() {
                        hub.connections.note_congested(sub.conn_id);
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(sub.conn_id);
                }
            }
        }
        for conn_id in dead {
            self.subscribers.remove(&conn_id);
        }
    }

    fn publish_room_event(
        &mut self,
        event: &str,
        principal_id: Option<i64>,
        detail: serde_json::Value,
    ) {
        let data = RoomEventData {
            room_id: self.record.id,
            event: event.to_string(),
            principal_id,
            detail,
        };
        self.broadcast(Arc::new(ServerEvent::RoomEvent(data)), false, None);
    }

    // ========================================================================
    // Message pipeline (post / edit / delete / react / pin)
    // ========================================================================

    /// Lifecycle gate for writes. Archived rooms are read-only; suspended
    /// rooms admit global admins only; deleted rooms are gone.
    fn write_gate(&self, role: GlobalRole) -> Result<(), RoomError> {
        match self.record.status {
            RoomStatus::Active | RoomStatus::Inactive => Ok(()),
            RoomStatus::Archived => Err(RoomError::ReadOnly),
            RoomStatus::Suspended => {
                if role >= GlobalRole::Admin {
                    Ok(())
                } else {
                    Err(RoomError::Suspended)
                }
            }
            RoomStatus::Deleted => Err(RoomError::RoomGone),
        }
    }

    fn member_of(&self, principal_id: i64) -> Result<&MembershipRecord, RoomError> {
        self.members.get(&principal_id).ok_or(RoomError::NotMember)
    }

    async fn handle_post(&mut self, params: PostParams) -> Result<PostReceipt, RoomError> {
        let principal = &params.principal;
        let member = self.member_of(principal.id)?;

        if member.view().is_muted(Utc::now()) {
            return Err(RoomError::Muted);
        }
        if !member.can_write {
            return Err(RoomError::Denied("write access revoked"));
        }
        self.write_gate(principal.role)?;

        if let Some(direct) = &self.direct {
            if direct.blocked {
                return Err(RoomError::Blocked);
            }
        }

        // Mentions must refer to members of this room.
        let mentions: Vec<i64> = params
            .mentions
            .iter()
            .copied()
            .filter(|id| self.members.contains_key(id))
            .collect();

        let record = with_retry(|| async {
            self.db
                .messages()
                .insert(NewMessage {
                    room_id: self.record.id,
                    author: Some((principal.id, principal.display_name.as_str())),
                    kind: params.kind,
                    content: &params.content,
                    reply_to: params.reply_to,
                    attachments: &params.attachments,
                    mentions: &mentions,
                    flagged: params.flagged,
                    flag_reason: params.flag_reason.as_deref(),
                })
                .await
        })
        .await?;

        // Mirror the counter updates the insert transaction made.
        self.record.last_message_id = record.room_seq;
        self.record.message_count += 1;
        self.record.last_activity_at = record.created_at;
        if self.record.status == RoomStatus::Inactive {
            self.record.status = RoomStatus::Active;
        }
        if self.direct.is_some() {
            let _ = self.db.directs().touch(self.record.id).await;
        }

        if params.flagged {
            crate::metrics::MODERATION_FLAGGED.inc();
            let reason = params.flag_reason.as_deref().unwrap_or("flagged");
            if let Err(e) = self
                .db
                .moderation()
                .enqueue_review(record.id, self.record.id, reason)
                .await
            {
                warn!(room = self.record.id, error = %e, "failed to enqueue moderation review");
            }
        }

        crate::metrics::MESSAGES_PERSISTED.inc();
        debug!(
            room = self.record.id,
            seq = record.room_seq,
            uuid = %record.uuid,
            flagged = record.flagged,
            "message persisted"
        );

        let event = Arc::new(ServerEvent::Message(Self::to_event(&record)));
        self.broadcast(event, record.flagged, params.origin);

        Ok(PostReceipt {
            message_id: record.room_seq,
            created_at: record.created_at,
            flagged: record.flagged,
        })
    }

    fn to_event(record: &MessageRecord) -> MessageEvent {
        MessageEvent {
            id: record.room_seq,
            room_id: record.room_id,
            author_id: record.author_id,
            author_name: record.author_name.clone(),
            kind: record.kind,
            content: record.content.clone(),
            timestamp: chrono::DateTime::from_timestamp_millis(record.created_at)
                .unwrap_or_else(Utc::now),
            is_edited: record.edited_at.is_some(),
            reply_to: record.reply_to,
            attachments: record.attachments.clone(),
            flagged: record.flagged,
        }
    }

    async fn fetch_message(&self, message_id: i64) -> Result<MessageRecord, RoomError> {
        with_retry(|| async { self.db.messages().fetch(self.record.id, message_id).await })
            .await?
            .ok_or(RoomError::MessageGone)
    }

    async fn handle_edit(
        &mut self,
        principal_id: i64,
        message_id: i64,
        content: String,
    ) -> Result<(), RoomError> {
        self.member_of(principal_id)?;
        self.write_gate(GlobalRole::Guest)?;

        let message = self.fetch_message(message_id).await?;
        if message.kind == palaver_proto::MessageKind::System {
            return Err(RoomError::SystemMessage);
        }
        if message.deleted_at.is_some() {
            return Err(RoomError::MessageGone);
        }
        if message.author_id != Some(principal_id) {
            return Err(RoomError::NotAuthor);
        }
        if !message.within_edit_window(crate::db::now_millis()) {
            return Err(RoomError::EditWindowExpired);
        }

        with_retry(|| async {
            self.db
                .messages()
                .apply_edit(self.record.id, message_id, &content)
                .await
        })
        .await?;

        let mut event = Self::to_event(&message);
        event.content = content;
        event.is_edited = true;
        self.broadcast(
            Arc::new(ServerEvent::MessageEdited(event)),
            message.flagged,
            None,
        );
        Ok(())
    }

    async fn handle_delete(
        &mut self,
        principal_id: i64,
        message_id: i64,
        as_moderator: bool,
    ) -> Result<(), RoomError> {
        let message = self.fetch_message(message_id).await?;
        if message.deleted_at.is_some() {
            return Err(RoomError::MessageGone);
        }

        if as_moderator {
            with_retry(|| async {
                self.db
                    .messages()
                    .soft_delete(self.record.id, message_id, Some(principal_id))
                    .await
            })
            .await?;
            let _ = self
                .db
                .moderation()
                .append(
                    "delete",
                    Some(principal_id),
                    message.author_id,
                    Some(self.record.id),
                    None,
                    None,
                )
                .await;
        } else {
            self.member_of(principal_id)?;
            if message.kind == palaver_proto::MessageKind::System {
                return Err(RoomError::SystemMessage);
            }
            if message.author_id != Some(principal_id) {
                return Err(RoomError::NotAuthor);
            }
            if !message.within_edit_window(crate::db::now_millis()) {
                return Err(RoomError::EditWindowExpired);
            }
            with_retry(|| async {
                self.db
                    .messages()
                    .soft_delete(self.record.id, message_id, None)
                    .await
            })
            .await?;
        }

        let event = Arc::new(ServerEvent::MessageDeleted {
            room_id: self.record.id,
            message_id,
        });
        self.broadcast(event, message.flagged, None);
        Ok(())
    }

    async fn handle_react(
        &mut self,
        principal: Principal,
        message_id: i64,
        emoji: String,
        remove: bool,
    ) -> Result<(), RoomError> {
        let member = self.member_of(principal.id)?;
        if member.view().is_muted(Utc::now()) {
            return Err(RoomError::Muted);
        }
        self.write_gate(principal.role)?;

        let message = self.fetch_message(message_id).await?;
        if message.deleted_at.is_some() {
            return Err(RoomError::MessageGone);
        }

        let changed = if remove {
            self.db
                .reactions()
                .remove(message.id, principal.id, &emoji)
                .await?
        } else {
            self.db
                .reactions()
                .add(message.id, principal.id, &emoji)
                .await?
        };

        // Idempotent re-add / absent remove: accepted, nothing to announce.
        if changed {
            let event = Arc::new(ServerEvent::Reaction {
                room_id: self.record.id,
                message_id,
                principal_id: principal.id,
                emoji,
                added: !remove,
            });
            self.broadcast(event, message.flagged, None);
        }
        Ok(())
    }

    async fn handle_pin(
        &mut self,
        principal_id: i64,
        message_id: i64,
        unpin: bool,
    ) -> Result<(), RoomError> {
        let message = self.fetch_message(message_id).await?;
        if message.deleted_at.is_some() {
            return Err(RoomError::MessageGone);
        }

        if unpin {
            self.db
                .rooms()
                .unpin_message(self.record.id, message_id)
                .await?;
            self.pinned.retain(|id| *id != message_id);
            self.publish_room_event("message-unpinned", Some(principal_id), serde_json::json!({ "message_id": message_id }));
        } else {
            self.db
                .rooms()
                .pin_message(self.record.id, message_id, principal_id)
                .await?;
            if !self.pinned.contains(&message_id) {
                self.pinned.insert(0, message_id);
            }
            self.publish_room_event("message-pinned", Some(principal_id), serde_json::json!({ "message_id": message_id }));
        }
        Ok(())
    }

    // ========================================================================
    // Membership (join / leave / kick / ban / mute / roles)
    // ========================================================================

    fn handle_subscribe(&mut self, subscriber: Subscriber) -> Result<(), RoomError> {
        if !subscriber.global_staff && !self.members.contains_key(&subscriber.principal_id) {
            return Err(RoomError::NotMember);
        }
        // Idempotent: re-subscribing replaces the handle, never duplicates.
        self.subscribers.insert(subscriber.conn_id, subscriber);
        Ok(())
    }

    async fn handle_join(
        &mut self,
        principal: Principal,
        password: Option<String>,
        invite_code: Option<String>,
    ) -> Result<(), RoomError> {
        if self.members.contains_key(&principal.id) {
            return Err(RoomError::AlreadyMember);
        }
        match self.record.status {
            RoomStatus::Active | RoomStatus::Inactive => {}
            RoomStatus::Archived => return Err(RoomError::ReadOnly),
            RoomStatus::Suspended => return Err(RoomError::Suspended),
            RoomStatus::Deleted => return Err(RoomError::RoomGone),
        }
        if self.record.room_type == RoomType::Direct {
            // Direct rooms have a fixed pair of members.
            return Err(RoomError::Denied("direct conversations are closed"));
        }
        if self.db.memberships().is_banned(self.record.id, principal.id).await? {
            return Err(RoomError::Banned);
        }
        if (principal.role.level() as i64) < self.record.required_level {
            return Err(RoomError::Denied("insufficient role for this room"));
        }
        if (self.members.len() as i64) >= self.record.max_members {
            return Err(RoomError::RoomFull);
        }

        match self.record.privacy {
            crate::db::Privacy::Password => {
                let Some(hash) = self.record.password_hash.clone() else {
                    return Err(RoomError::BadPassword);
                };
                let Some(password) = password else {
                    return Err(RoomError::BadPassword);
                };
                let ok = tokio::task::spawn_blocking(move || {
                    bcrypt::verify(password, &hash).unwrap_or(false)
                })
                .await
                .unwrap_or(false);
                if !ok {
                    return Err(RoomError::BadPassword);
                }
                self.insert_membership(principal.id).await?;
            }
            crate::db::Privacy::InviteOnly => {
                let invitation = match invite_code {
                    Some(code) => self
                        .db
                        .invitations()
                        .fetch_by_code(&code)
                        .await?
                        .filter(|inv| inv.room_id == self.record.id)
                        .ok_or(RoomError::InvalidInvite)?,
                    None => self
                        .db
                        .invitations()
                        .pending_for(self.record.id, principal.id)
                        .await?
                        .ok_or(RoomError::InviteRequired)?,
                };
                // Acceptance creates the membership atomically.
                self.db
                    .invitations()
                    .accept(invitation.id, principal.id)
                    .await
                    .map_err(|e| match e {
                        DbError::Conflict(_) => RoomError::InvalidInvite,
                        other => RoomError::Db(other),
                    })?;
                let membership = self
                    .db
                    .memberships()
                    .active(self.record.id, principal.id)
                    .await?
                    .ok_or(RoomError::InvalidInvite)?;
                self.record.member_count += 1;
                self.members.insert(principal.id, membership);
            }
            crate::db::Privacy::Public | crate::db::Privacy::Private => {
                self.insert_membership(principal.id).await?;
            }
        }

        self.publish_room_event(
            "member-joined",
            Some(principal.id),
            serde_json::json!({ "display_name": principal.display_name }),
        );
        Ok(())
    }

    async fn insert_membership(&mut self, principal_id: i64) -> Result<(), RoomError> {
        let membership = self
            .db
            .memberships()
            .insert(self.record.id, principal_id, RoomRole::Member)
            .await
            .map_err(|e| match e {
                DbError::Conflict(_) => RoomError::AlreadyMember,
                other => RoomError::Db(other),
            })?;
        self.db.rooms().bump_member_count(self.record.id, 1).await?;
        self.record.member_count += 1;
        self.members.insert(principal_id, membership);
        Ok(())
    }

    fn drop_member_state(&mut self, principal_id: i64) {
        self.members.remove(&principal_id);
        self.subscribers
            .retain(|_, sub| sub.principal_id != principal_id || sub.global_staff);
    }

    async fn handle_leave(&mut self, principal_id: i64) -> Result<(), RoomError> {
        let member = self.member_of(principal_id)?;
        if member.role == RoomRole::Owner {
            return Err(RoomError::OwnerCannotLeave);
        }

        self.db.memberships().close(self.record.id, principal_id).await?;
        self.db.rooms().bump_member_count(self.record.id, -1).await?;
        self.record.member_count -= 1;
        self.drop_member_state(principal_id);
        self.publish_room_event("member-left", Some(principal_id), serde_json::Value::Null);
        Ok(())
    }

    async fn handle_remove_member(
        &mut self,
        actor_id: i64,
        target_id: i64,
        reason: Option<String>,
        ban: bool,
    ) -> Result<(), RoomError> {
        let target = self.members.get(&target_id).ok_or(RoomError::TargetNotMember)?;
        if target.role == RoomRole::Owner {
            return Err(RoomError::CannotTargetOwner);
        }

        if ban {
            self.db.memberships().ban(self.record.id, target_id).await?;
        } else {
            self.db.memberships().close(self.record.id, target_id).await?;
        }
        self.db.rooms().bump_member_count(self.record.id, -1).await?;
        self.record.member_count -= 1;
        self.drop_member_state(target_id);

        let action = if ban { "ban" } else { "kick" };
        let _ = self
            .db
            .moderation()
            .append(
                action,
                Some(actor_id),
                Some(target_id),
                Some(self.record.id),
                reason.as_deref(),
                None,
            )
            .await;

        let event = if ban { "member-banned" } else { "member-kicked" };
        self.publish_room_event(
            event,
            Some(target_id),
            serde_json::json!({ "reason": reason }),
        );
        Ok(())
    }

    async fn handle_unban(&mut self, actor_id: i64, target_id: i64) -> Result<(), RoomError> {
        let lifted = self.db.memberships().unban(self.record.id, target_id).await?;
        if !lifted {
            return Err(RoomError::TargetNotMember);
        }
        let _ = self
            .db
            .moderation()
            .append("unban", Some(actor_id), Some(target_id), Some(self.record.id), None, None)
            .await;
        self.publish_room_event("member-unbanned", Some(target_id), serde_json::Value::Null);
        Ok(())
    }

    async fn handle_mute(
        &mut self,
        actor_id: i64,
        target_id: i64,
        duration_secs: Option<i64>,
    ) -> Result<(), RoomError> {
        if !self.members.contains_key(&target_id) {
            return Err(RoomError::TargetNotMember);
        }
        if self.members.get(&target_id).map(|m| m.role) == Some(RoomRole::Owner) {
            return Err(RoomError::CannotTargetOwner);
        }

        let muted_until = duration_secs.map(|secs| crate::db::now_millis() + secs * 1000);
        self.db
            .memberships()
            .set_mute(self.record.id, target_id, muted_until)
            .await?;
        if let Some(member) = self.members.get_mut(&target_id) {
            member.muted_until = muted_until;
        }

        let (action, event) = if duration_secs.is_some() {
            ("mute", "member-muted")
        } else {
            ("unmute", "member-unmuted")
        };
        let _ = self
            .db
            .moderation()
            .append(
                action,
                Some(actor_id),
                Some(target_id),
                Some(self.record.id),
                None,
                duration_secs,
            )
            .await;
        self.publish_room_event(
            event,
            Some(target_id),
            serde_json::json!({ "duration_secs": duration_secs }),
        );
        Ok(())
    }

    async fn handle_change_role(
        &mut self,
        actor_id: i64,
        target_id: i64,
        role: RoomRole,
    ) -> Result<(), RoomError> {
        let target = self.members.get(&target_id).ok_or(RoomError::TargetNotMember)?;
        if target.role == RoomRole::Owner {
            return Err(RoomError::CannotTargetOwner);
        }
        if role == RoomRole::Owner {
            return Err(RoomError::Denied("use ownership transfer"));
        }

        self.db
            .memberships()
            .set_role(self.record.id, target_id, role)
            .await?;
        if let Some(member) = self.members.get_mut(&target_id) {
            member.role = role;
            member.can_moderate = role >= RoomRole::Moderator;
        }
        let _ = self
            .db
            .moderation()
            .append(
                "change-role",
                Some(actor_id),
                Some(target_id),
                Some(self.record.id),
                Some(role.as_str()),
                None,
            )
            .await;
        self.publish_room_event(
            "role-changed",
            Some(target_id),
            serde_json::json!({ "role": role.as_str() }),
        );
        Ok(())
    }

    async fn handle_transfer(&mut self, actor_id: i64, target_id: i64) -> Result<(), RoomError> {
        if self.record.owner_id != actor_id {
            return Err(RoomError::Denied("only the owner may transfer ownership"));
        }
        if !self.members.contains_key(&target_id) {
            return Err(RoomError::TargetNotMember);
        }

        self.db
            .memberships()
            .transfer_ownership(self.record.id, actor_id, target_id)
            .await?;

        if let Some(member) = self.members.get_mut(&actor_id) {
            member.role = RoomRole::Admin;
        }
        if let Some(member) = self.members.get_mut(&target_id) {
            member.role = RoomRole::Owner;
            member.can_moderate = true;
        }
        self.record.owner_id = target_id;
        self.publish_room_event(
            "ownership-transferred",
            Some(target_id),
            serde_json::json!({ "previous_owner": actor_id }),
        );
        Ok(())
    }

    async fn handle_set_status(
        &mut self,
        actor: Principal,
        status: RoomStatus,
    ) -> Result<(), RoomError> {
        let room_level = self
            .members
            .get(&actor.id)
            .map(|m| m.role.level())
            .unwrap_or(0);

        let allowed = match status {
            // Archive: owner or room/global admin.
            RoomStatus::Archived => {
                self.record.owner_id == actor.id
                    || room_level >= RoomRole::Admin.level()
                    || actor.role >= GlobalRole::Admin
            }
            // Suspend: platform admins only.
            RoomStatus::Suspended => actor.role >= GlobalRole::Admin,
            // Soft delete: owner or platform admin.
            RoomStatus::Deleted => {
                self.record.owner_id == actor.id || actor.role >= GlobalRole::Admin
            }
            // Reactivation of archived/suspended rooms follows the same rule
            // as the transition that got them there.
            RoomStatus::Active => {
                self.record.owner_id == actor.id || actor.role >= GlobalRole::Admin
            }
            RoomStatus::Inactive => false,
        };
        if !allowed {
            return Err(RoomError::Denied("insufficient role for this transition"));
        }

        self.db.rooms().set_status(self.record.id, status).await?;
        self.record.status = status;

        let event = match status {
            RoomStatus::Archived => "room-archived",
            RoomStatus::Suspended => "room-suspended",
            RoomStatus::Deleted => "room-deleted",
            RoomStatus::Active => "room-activated",
            RoomStatus::Inactive => "room-deactivated",
        };
        if status == RoomStatus::Suspended || status == RoomStatus::Deleted {
            let _ = self
                .db
                .moderation()
                .append(event, Some(actor.id), None, Some(self.record.id), None, None)
                .await;
        }
        self.publish_room_event(event, None, serde_json::Value::Null);

        if status == RoomStatus::Deleted {
            // Drop the actor: the manager evicts the mailbox so the task
            // drains and stops.
            if let Some(hub) = self.hub.upgrade() {
                hub.rooms.evict(self.record.id);
            }
            self.subscribers.clear();
        }
        Ok(())
    }

    async fn handle_set_blocked(
        &mut self,
        principal_id: i64,
        blocked: bool,
    ) -> Result<(), RoomError> {
        let Some(direct) = &mut self.direct else {
            return Err(RoomError::Denied("blocking applies to direct conversations"));
        };
        if principal_id != direct.user1_id && principal_id != direct.user2_id {
            return Err(RoomError::NotMember);
        }

        if blocked {
            self.db.directs().block(self.record.id, principal_id).await?;
            direct.blocked = true;
            direct.blocker_id = Some(principal_id);
        } else {
            self.db
                .directs()
                .unblock(self.record.id, principal_id)
                .await
                .map_err(|e| match e {
                    DbError::Conflict(_) => RoomError::Denied("only the blocker may unblock"),
                    other => RoomError::Db(other),
                })?;
            direct.blocked = false;
            direct.blocker_id = None;
        }
        Ok(())
    }

    async fn handle_update_settings(
        &mut self,
        actor_id: i64,
        change: SettingsChange,
    ) -> Result<(), RoomError> {
        let room_level = self
            .members
            .get(&actor_id)
            .map(|m| m.role.level())
            .unwrap_or(0);
        // Topic changes are open to room staff; structural settings need
        // the owner or a room admin.
        let required = match &change {
            SettingsChange::Topic(_) => RoomRole::Moderator.level(),
            _ => RoomRole::Admin.level(),
        };
        if self.record.owner_id != actor_id && room_level < required {
            return Err(RoomError::Denied("insufficient room role"));
        }

        let mut topic = self.record.topic.clone();
        let mut privacy = self.record.privacy;
        let mut max_members = self.record.max_members;
        let mut required_level = self.record.required_level;
        let mut password_hash = self.record.password_hash.clone();
        let (event, detail) = match change {
            SettingsChange::Topic(new_topic) => {
                topic = new_topic;
                ("topic-changed", serde_json::json!({ "topic": topic }))
            }
            SettingsChange::Password(Some(plaintext)) => {
                let hash = tokio::task::spawn_blocking(move || {
                    bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)
                })
                .await
                .map_err(|_| RoomError::Db(DbError::Unavailable))?
                .map_err(|_| RoomError::Db(DbError::Unavailable))?;
                password_hash = Some(hash);
                privacy = crate::db::Privacy::Password;
                ("settings-changed", serde_json::json!({ "privacy": "password" }))
            }
            SettingsChange::Password(None) => {
                password_hash = None;
                privacy = crate::db::Privacy::Public;
                ("settings-changed", serde_json::json!({ "privacy": "public" }))
            }
            SettingsChange::MaxMembers(cap) => {
                max_members = cap.max(1);
                ("settings-changed", serde_json::json!({ "max_members": max_members }))
            }
            SettingsChange::RequiredLevel(level) => {
                required_level = level.clamp(0, 100);
                ("settings-changed", serde_json::json!({ "required_level": required_level }))
            }
        };

        self.db
            .rooms()
            .update_settings(
                self.record.id,
                &self.record.name,
                topic.as_deref(),
                privacy,
                max_members,
                required_level,
                password_hash.clone(),
            )
            .await?;
        self.record.topic = topic;
        self.record.privacy = privacy;
        self.record.max_members = max_members;
        self.record.required_level = required_level;
        self.record.password_hash = password_hash;
        self.publish_room_event(event, Some(actor_id), detail);
        Ok(())
    }
}
