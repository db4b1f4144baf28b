//! The message router.
//!
//! Every inbound command passes through the same ordered pipeline: resolve
//! the target, consult the permission oracle, the rate limiter, and (for
//! content) the moderation chain, then apply the mutation through the
//! room's actor and acknowledge the originating connection. This is the
//! only component that converts internal errors into client-visible error
//! envelopes.

use chrono::Utc;
use lazy_static::lazy_static;
use palaver_proto::{
    AckData, ClientCommand, ClientFrame, MessageKind, RoomTarget, ServerEvent, TypingData,
    TypingState,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::auth::Principal;
use crate::authz::{Action, Target};
use crate::db::RoomStatus;
use crate::error::{EngineError, EngineResult};
use crate::moderation::{ContentCtx, ContentViolation, Decision};
use crate::state::{
    ConnId, Hub, PostParams, RoomCommand, RoomDescription, SettingsChange, Subscriber,
};

/// Default deadline for one client command.
const COMMAND_DEADLINE: Duration = Duration::from_secs(10);

lazy_static! {
    /// Numeric mentions: `@123`. Display-name resolution belongs to the
    /// directory service; the engine stores principal ids.
    static ref MENTION_RE: Regex = Regex::new(r"@(\d{1,19})\b").expect("static regex");
}

/// Per-connection routing context, owned by the connection task.
pub struct ConnCtx {
    pub conn_id: ConnId,
    pub principal: Principal,
    pub tx: mpsc::Sender<Arc<ServerEvent>>,
    /// Rooms this connection is subscribed to, for close-time cleanup.
    pub subscriptions: HashSet<i64>,
}

impl ConnCtx {
    /// Enqueue a reply on this connection's own outbound queue.
    ///
    /// Replies share the queue with broadcasts so one connection observes
    /// everything in a single order; `try_send` keeps the router from ever
    /// blocking on a full queue.
    fn reply(&self, hub: &Hub, event: ServerEvent) {
        if self.tx.try_send(Arc::new(event)).is_err() {
            hub.connections.note_congested(self.conn_id);
        }
    }
}

/// The central pipeline.
pub struct MessageRouter {
    hub: Arc<Hub>,
}

impl MessageRouter {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Route one decoded frame, converting failures into error envelopes.
    #[instrument(skip(self, ctx, frame), fields(conn = %ctx.conn_id, principal = ctx.principal.id, command = frame.command.name()))]
    pub async fn handle(&self, ctx: &mut ConnCtx, frame: ClientFrame) {
        let correlation = frame.correlation_id.clone();
        let result = match tokio::time::timeout(
            COMMAND_DEADLINE,
            self.dispatch(ctx, frame.command, correlation.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Unavailable),
        };

        if let Err(err) = result {
            match &err {
                EngineError::Internal(detail) => {
                    error!(detail = %detail, "command failed with internal error");
                }
                EngineError::Forbidden(_) => {
                    crate::metrics::PERMISSION_DENIED.inc();
                }
                _ => {}
            }
            debug!(code = %err.error_code(), "command rejected");
            ctx.reply(&self.hub, ServerEvent::Error(err.to_error_data(correlation)));
            if err.closes_connection() {
                self.hub.connections.close(
                    ctx.conn_id,
                    err.error_code(),
                    "closing after fatal error",
                );
            }
        }
    }

    fn ack(&self, ctx: &ConnCtx, correlation: Option<String>, room_id: Option<i64>, message_id: Option<i64>) {
        ctx.reply(
            &self.hub,
            ServerEvent::Ack(AckData {
                message_id,
                room_id,
                timestamp: Utc::now(),
                correlation_id: correlation,
            }),
        );
    }

    /// Resolve a wire target to a room id. The slug form `@<id>` addresses
    /// the direct conversation with that principal, creating it on first
    /// use.
    async fn resolve_target(&self, ctx: &ConnCtx, target: &RoomTarget) -> EngineResult<i64> {
        if let RoomTarget::Slug(slug) = target {
            if let Some(other) = slug.strip_prefix('@').and_then(|s| s.parse::<i64>().ok()) {
                let (conversation, created) = self
                    .hub
                    .db
                    .directs()
                    .get_or_create(ctx.principal.id, other)
                    .await?;
                if created {
                    debug!(room = conversation.room_id, "direct conversation created");
                }
                return Ok(conversation.room_id);
            }
        }
        self.hub.rooms.resolve(target).await
    }

    /// Describe a room from the caller's perspective and run the oracle.
    async fn authorize(
        &self,
        ctx: &ConnCtx,
        room_id: i64,
        action: Action,
        is_author: bool,
    ) -> EngineResult<RoomDescription> {
        let description = self.hub.rooms.describe(room_id, ctx.principal.id).await?;
        let target = Target {
            membership: description.membership.as_ref().map(|m| m.view()),
            required_level: description.record.required_level.clamp(0, u8::MAX as i64) as u8,
            is_author,
        };
        self.hub
            .oracle
            .check(&ctx.principal, action, &target)
            .map_err(|deny| EngineError::Forbidden(deny.to_string()))?;
        Ok(description)
    }

    async fn dispatch(
        &self,
        ctx: &mut ConnCtx,
        command: ClientCommand,
        correlation: Option<String>,
    ) -> EngineResult<()> {
        match command {
            ClientCommand::Ping => {
                ctx.reply(&self.hub, ServerEvent::Pong);
                Ok(())
            }
            // Heartbeat replies are consumed by the connection task; one that
            // leaks through is harmless.
            ClientCommand::Pong => Ok(()),
            // The transport authenticates during the handshake; a second
            // credential presentation is a no-op.
            ClientCommand::Connect(_) => {
                self.ack(ctx, correlation, None, None);
                Ok(())
            }
            ClientCommand::Message(send) => self.handle_message(ctx, send, correlation).await,
            ClientCommand::Edit(edit) => {
                let room_id = self.resolve_target(ctx, &edit.room).await?;
                let message = self
                    .hub
                    .db
                    .messages_read()
                    .fetch(room_id, edit.message_id)
                    .await?
                    .ok_or(EngineError::NotFound("message"))?;
                let is_author = message.author_id == Some(ctx.principal.id);
                self.authorize(ctx, room_id, Action::EditMessage, is_author).await?;

                self.moderate(ctx, room_id, &edit.content)
                    .await?
                    .into_block_error()?;

                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Edit {
                        principal_id: ctx.principal.id,
                        message_id: edit.message_id,
                        content: edit.content,
                        reply,
                    })
                    .await?;
                self.ack(ctx, correlation, Some(room_id), Some(edit.message_id));
                Ok(())
            }
            ClientCommand::Delete(delete) => {
                let room_id = self.resolve_target(ctx, &delete.room).await?;
                let message = self
                    .hub
                    .db
                    .messages_read()
                    .fetch(room_id, delete.message_id)
                    .await?
                    .ok_or(EngineError::NotFound("message"))?;
                let is_author = message.author_id == Some(ctx.principal.id);

                let as_moderator = if is_author {
                    self.authorize(ctx, room_id, Action::DeleteOwnMessage, true).await?;
                    false
                } else {
                    self.authorize(ctx, room_id, Action::DeleteAnyMessage, false).await?;
                    true
                };

                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Delete {
                        principal_id: ctx.principal.id,
                        message_id: delete.message_id,
                        as_moderator,
                        reply,
                    })
                    .await?;
                self.ack(ctx, correlation, Some(room_id), Some(delete.message_id));
                Ok(())
            }
            ClientCommand::React(react) => {
                let room_id = self.resolve_target(ctx, &react.room).await?;
                self.authorize(ctx, room_id, Action::React, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::React {
                        principal: ctx.principal.clone(),
                        message_id: react.message_id,
                        emoji: react.emoji,
                        remove: react.remove,
                        reply,
                    })
                    .await?;
                self.ack(ctx, correlation, Some(room_id), Some(react.message_id));
                Ok(())
            }
            ClientCommand::Pin(pin) => {
                let room_id = self.resolve_target(ctx, &pin.room).await?;
                self.authorize(ctx, room_id, Action::Pin, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Pin {
                        principal_id: ctx.principal.id,
                        message_id: pin.message_id,
                        unpin: pin.unpin,
                        reply,
                    })
                    .await?;
                self.ack(ctx, correlation, Some(room_id), Some(pin.message_id));
                Ok(())
            }
            ClientCommand::Join(join) => {
                let room_id = self.resolve_target(ctx, &join.room).await?;
                self.hub
                    .limits
                    .check_join(&ctx.principal)
                    .map_err(|retry_after| EngineError::RateLimited { retry_after })?;
                self.authorize(ctx, room_id, Action::JoinRoom, false).await?;

                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Join {
                        principal: ctx.principal.clone(),
                        password: join.password,
                        invite_code: join.invite_code,
                        reply,
                    })
                    .await?;

                // A joined room is part of this connection's default set.
                self.subscribe_conn(ctx, room_id).await?;
                self.ack(ctx, correlation, Some(room_id), None);
                Ok(())
            }
            ClientCommand::Leave(leave) => {
                let room_id = self.resolve_target(ctx, &leave.room).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Leave {
                        principal_id: ctx.principal.id,
                        reply,
                    })
                    .await?;
                ctx.subscriptions.remove(&room_id);
                self.ack(ctx, correlation, Some(room_id), None);
                Ok(())
            }
            ClientCommand::Typing(typing) => {
                let room_id = self.resolve_target(ctx, &typing.room).await?;
                let description = self.hub.rooms.describe(room_id, ctx.principal.id).await?;
                if description.membership.is_none() {
                    return Err(EngineError::Forbidden("not a member of this room".into()));
                }

                let changed = match typing.state {
                    TypingState::Start => self.hub.presence.start_typing(room_id, ctx.principal.id),
                    TypingState::Stop => self.hub.presence.stop_typing(room_id, ctx.principal.id),
                };
                if changed {
                    let event = Arc::new(ServerEvent::Typing(TypingData {
                        room_id,
                        principal_id: ctx.principal.id,
                        display_name: ctx.principal.display_name.clone(),
                        typing: typing.state == TypingState::Start,
                    }));
                    self.hub.rooms.notify_resident(
                        room_id,
                        RoomCommand::Broadcast {
                            event,
                            staff_only: false,
                            exclude: Some(ctx.conn_id),
                        },
                    );
                }
                self.ack(ctx, correlation, Some(room_id), None);
                Ok(())
            }
            ClientCommand::MarkRead(mark) => {
                let room_id = self.resolve_target(ctx, &mark.room).await?;
                let description = self.hub.rooms.describe(room_id, ctx.principal.id).await?;
                if description.membership.is_none() {
                    return Err(EngineError::Forbidden("not a member of this room".into()));
                }
                if let Some(tx) = self.hub.rooms.resident(room_id) {
                    let _ = tx
                        .send(RoomCommand::MarkRead {
                            principal_id: ctx.principal.id,
                            message_id: mark.message_id,
                        })
                        .await;
                }
                self.ack(ctx, correlation, Some(room_id), Some(mark.message_id));
                Ok(())
            }
            ClientCommand::Subscribe(subscribe) => {
                let room_id = self.resolve_target(ctx, &subscribe.room).await?;
                self.authorize(ctx, room_id, Action::ReadHistory, false).await?;
                self.subscribe_conn(ctx, room_id).await?;
                self.ack(ctx, correlation, Some(room_id), None);
                Ok(())
            }
            ClientCommand::Unsubscribe(unsubscribe) => {
                let room_id = self.resolve_target(ctx, &unsubscribe.room).await?;
                if ctx.subscriptions.remove(&room_id) {
                    self.hub
                        .rooms
                        .notify_resident(room_id, RoomCommand::Unsubscribe { conn_id: ctx.conn_id });
                }
                self.ack(ctx, correlation, Some(room_id), None);
                Ok(())
            }
        }
    }

    /// Subscribe a connection to a room's event stream. Idempotent.
    pub async fn subscribe_conn(&self, ctx: &mut ConnCtx, room_id: i64) -> EngineResult<()> {
        self.hub
            .rooms
            .call(room_id, |reply| RoomCommand::Subscribe {
                subscriber: Subscriber {
                    conn_id: ctx.conn_id,
                    principal_id: ctx.principal.id,
                    global_staff: ctx.principal.role.is_staff(),
                    tx: ctx.tx.clone(),
                },
                reply,
            })
            .await?;
        ctx.subscriptions.insert(room_id);
        Ok(())
    }

    /// Run the moderation chain over one piece of content.
    async fn moderate(
        &self,
        ctx: &ConnCtx,
        room_id: i64,
        content: &str,
    ) -> EngineResult<Decision> {
        let content_ctx = ContentCtx {
            principal_id: ctx.principal.id,
            room_id,
            content,
            kind: MessageKind::Text,
        };
        match self.hub.moderation.review(&content_ctx).await {
            Ok(decision) => Ok(decision),
            Err(ContentViolation::TooLong { actual, limit }) => Err(EngineError::Validation(
                format!("text of {actual} code points exceeds the limit of {limit}"),
            )),
            Err(violation) => Err(EngineError::Validation(violation.to_string())),
        }
    }

    async fn handle_message(
        &self,
        ctx: &mut ConnCtx,
        send: palaver_proto::command::SendMessage,
        correlation: Option<String>,
    ) -> EngineResult<()> {
        // System messages are server-originated only.
        if send.kind == MessageKind::System {
            return Err(EngineError::Validation(
                "clients cannot send system messages".into(),
            ));
        }
        if send.content.trim().is_empty() && send.attachments.is_empty() {
            return Err(EngineError::Validation("empty message".into()));
        }

        // Slash commands ride the message frame but are room operations.
        // `/create` is special: its target room does not exist yet.
        if send.kind == MessageKind::Command || send.content.starts_with('/') {
            if let Some(rest) = send.content.trim_start_matches('/').strip_prefix("create ") {
                let (slug, name) = match rest.trim().split_once(' ') {
                    Some((slug, name)) => (slug, name.trim()),
                    None => (rest.trim(), rest.trim()),
                };
                if slug.is_empty() {
                    return Err(EngineError::Validation("expected a room slug".into()));
                }
                let new_room_id = self.create_room(&ctx.principal, slug, name).await?;
                self.subscribe_conn(ctx, new_room_id).await?;
                self.ack(ctx, correlation, Some(new_room_id), None);
                return Ok(());
            }
            let room_id = self.resolve_target(ctx, &send.room).await?;
            return self.handle_slash(ctx, room_id, &send.content, correlation).await;
        }

        let room_id = self.resolve_target(ctx, &send.room).await?;

        let action = if send.attachments.is_empty() {
            Action::SendMessage
        } else {
            Action::UploadAttachment
        };
        self.authorize(ctx, room_id, action, false).await?;

        self.hub
            .limits
            .check_message(&ctx.principal)
            .map_err(|retry_after| EngineError::RateLimited { retry_after })?;
        self.hub
            .limits
            .check_room_message(&ctx.principal, room_id)
            .map_err(|retry_after| EngineError::RateLimited { retry_after })?;

        let decision = self.moderate(ctx, room_id, &send.content).await?;
        let (flagged, flag_reason) = match decision {
            Decision::Block(reason) => {
                crate::metrics::MODERATION_BLOCKED.inc();
                let _ = self
                    .hub
                    .db
                    .moderation()
                    .append(
                        "block",
                        None,
                        Some(ctx.principal.id),
                        Some(room_id),
                        Some(&reason),
                        None,
                    )
                    .await;
                self.hub
                    .reputation
                    .record_violation(ctx.principal.id, 20)
                    .await;
                return Err(EngineError::ModeratedBlock(reason));
            }
            Decision::Flag(reason) => (true, Some(reason)),
            Decision::Allow => (false, None),
        };

        let mentions: Vec<i64> = MENTION_RE
            .captures_iter(&send.content)
            .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse().ok()))
            .collect();

        let receipt = self
            .hub
            .rooms
            .call(room_id, |reply| RoomCommand::Post {
                params: Box::new(PostParams {
                    principal: ctx.principal.clone(),
                    kind: send.kind,
                    content: send.content,
                    reply_to: send.reply_to,
                    attachments: send.attachments,
                    mentions,
                    flagged,
                    flag_reason,
                    origin: Some(ctx.conn_id),
                }),
                reply,
            })
            .await?;

        self.ack(ctx, correlation, Some(room_id), Some(receipt.message_id));
        if receipt.flagged {
            // Persisted but held for review; tell the sender.
            ctx.reply(
                &self.hub,
                ServerEvent::Error(palaver_proto::ErrorData::new(
                    palaver_proto::ErrorCode::ModeratedFlag,
                    "message held for moderator review",
                )),
            );
        }
        Ok(())
    }

    // ========================================================================
    // Slash commands (room administration over the message frame)
    // ========================================================================

    async fn handle_slash(
        &self,
        ctx: &mut ConnCtx,
        room_id: i64,
        content: &str,
        correlation: Option<String>,
    ) -> EngineResult<()> {
        let mut parts = content.trim_start_matches('/').splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        fn target_id(arg: &str) -> EngineResult<i64> {
            arg.trim_start_matches('@')
                .parse()
                .map_err(|_| EngineError::Validation("expected a principal id".into()))
        }

        fn split_first(rest: &str) -> (&str, &str) {
            match rest.split_once(' ') {
                Some((first, tail)) => (first, tail.trim()),
                None => (rest, ""),
            }
        }

        match verb {
            "kick" => {
                let (target, reason) = split_first(rest);
                let target = target_id(target)?;
                self.authorize(ctx, room_id, Action::Kick, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Kick {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        reason: (!reason.is_empty()).then(|| reason.to_string()),
                        reply,
                    })
                    .await?;
            }
            "ban" => {
                let (target, reason) = split_first(rest);
                let target = target_id(target)?;
                self.authorize(ctx, room_id, Action::Ban, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Ban {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        reason: (!reason.is_empty()).then(|| reason.to_string()),
                        reply,
                    })
                    .await?;
            }
            "unban" => {
                let target = target_id(rest)?;
                self.authorize(ctx, room_id, Action::Ban, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Unban {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        reply,
                    })
                    .await?;
            }
            "mute" => {
                let (target, duration) = split_first(rest);
                let target = target_id(target)?;
                let duration_secs: i64 = duration.parse().unwrap_or(300);
                self.authorize(ctx, room_id, Action::Mute, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Mute {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        duration_secs,
                        reply,
                    })
                    .await?;
            }
            "unmute" => {
                let target = target_id(rest)?;
                self.authorize(ctx, room_id, Action::Mute, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::Unmute {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        reply,
                    })
                    .await?;
            }
            "role" => {
                let (target, role) = split_first(rest);
                let target = target_id(target)?;
                let role = crate::authz::RoomRole::parse(role)
                    .ok_or_else(|| EngineError::Validation("unknown role".into()))?;
                self.authorize(ctx, room_id, Action::ChangeRole, false).await?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::ChangeRole {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        role,
                        reply,
                    })
                    .await?;
            }
            "transfer" => {
                let target = target_id(rest)?;
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::TransferOwnership {
                        actor_id: ctx.principal.id,
                        target_id: target,
                        reply,
                    })
                    .await?;
            }
            "archive" => {
                self.set_room_status(ctx, room_id, RoomStatus::Archived).await?;
            }
            "unarchive" => {
                self.set_room_status(ctx, room_id, RoomStatus::Active).await?;
            }
            "suspend" => {
                self.set_room_status(ctx, room_id, RoomStatus::Suspended).await?;
            }
            "delete-room" => {
                self.set_room_status(ctx, room_id, RoomStatus::Deleted).await?;
                ctx.subscriptions.remove(&room_id);
            }
            "create" => {
                let (slug, name) = split_first(rest);
                if slug.is_empty() {
                    return Err(EngineError::Validation("expected a room slug".into()));
                }
                let name = if name.is_empty() { slug } else { name };
                let new_room_id = self.create_room(&ctx.principal, slug, name).await?;
                self.subscribe_conn(ctx, new_room_id).await?;
                self.ack(ctx, correlation, Some(new_room_id), None);
                return Ok(());
            }
            "topic" => {
                let change = SettingsChange::Topic((!rest.is_empty()).then(|| rest.to_string()));
                self.update_settings(ctx, room_id, change).await?;
            }
            "password" => {
                let change =
                    SettingsChange::Password((!rest.is_empty()).then(|| rest.to_string()));
                self.update_settings(ctx, room_id, change).await?;
            }
            "max-members" => {
                let cap: i64 = rest
                    .parse()
                    .map_err(|_| EngineError::Validation("expected a member cap".into()))?;
                self.update_settings(ctx, room_id, SettingsChange::MaxMembers(cap)).await?;
            }
            "required-level" => {
                let level: i64 = rest
                    .parse()
                    .map_err(|_| EngineError::Validation("expected a role level".into()))?;
                self.update_settings(ctx, room_id, SettingsChange::RequiredLevel(level))
                    .await?;
            }
            "invite" => {
                self.authorize(ctx, room_id, Action::Invite, false).await?;
                let (first, tail) = split_first(rest);
                let invitee = if first.is_empty() {
                    None
                } else {
                    Some(target_id(first)?)
                };
                let max_uses: i64 = tail.parse().unwrap_or(1);
                let invitation = self
                    .hub
                    .db
                    .invitations()
                    .create(room_id, ctx.principal.id, invitee, max_uses.max(1), Some(7 * 86_400_000))
                    .await?;
                // The code goes back to the inviter as a room event on their
                // own queue.
                ctx.reply(
                    &self.hub,
                    ServerEvent::RoomEvent(palaver_proto::RoomEventData {
                        room_id,
                        event: "invitation-created".into(),
                        principal_id: invitee,
                        detail: serde_json::json!({ "code": invitation.code, "max_uses": invitation.max_uses }),
                    }),
                );
            }
            "revoke" => {
                self.authorize(ctx, room_id, Action::Invite, false).await?;
                if !self.hub.db.invitations().revoke(room_id, rest).await? {
                    return Err(EngineError::NotFound("invitation"));
                }
            }
            "block" | "unblock" => {
                let blocked = verb == "block";
                self.hub
                    .rooms
                    .call(room_id, |reply| RoomCommand::SetBlocked {
                        principal_id: ctx.principal.id,
                        blocked,
                        reply,
                    })
                    .await?;
            }
            other => {
                warn!(verb = other, "unknown slash command");
                return Err(EngineError::Validation(format!("unknown command: /{other}")));
            }
        }

        self.ack(ctx, correlation, Some(room_id), None);
        Ok(())
    }

    async fn update_settings(
        &self,
        ctx: &ConnCtx,
        room_id: i64,
        change: SettingsChange,
    ) -> EngineResult<()> {
        self.hub
            .rooms
            .call(room_id, |reply| RoomCommand::UpdateSettings {
                actor_id: ctx.principal.id,
                change,
                reply,
            })
            .await
    }

    async fn set_room_status(
        &self,
        ctx: &ConnCtx,
        room_id: i64,
        status: RoomStatus,
    ) -> EngineResult<()> {
        self.hub
            .rooms
            .call(room_id, |reply| RoomCommand::SetStatus {
                actor: ctx.principal.clone(),
                status,
                reply,
            })
            .await
    }

    /// Room-creation entry point, used by the `join`-a-new-slug flow in the
    /// HTTP surface and by tests.
    pub async fn create_room(
        &self,
        principal: &Principal,
        slug: &str,
        name: &str,
    ) -> EngineResult<i64> {
        self.hub
            .oracle
            .check(principal, Action::CreateRoom, &Target::default())
            .map_err(|deny| EngineError::Forbidden(deny.to_string()))?;
        self.hub
            .limits
            .check_create(principal)
            .map_err(|retry_after| EngineError::RateLimited { retry_after })?;

        let record = self
            .hub
            .rooms
            .create_room(crate::db::NewRoom {
                slug: Some(slug),
                name,
                room_type: crate::db::RoomType::Public,
                privacy: crate::db::Privacy::Public,
                owner_id: principal.id,
                topic: None,
                max_members: self.hub.settings.rooms.default_max_members as i64,
                required_level: 0,
                password_hash: None,
            })
            .await?;
        Ok(record.id)
    }
}

impl Decision {
    fn into_block_error(self) -> EngineResult<()> {
        match self {
            Decision::Block(reason) => {
                crate::metrics::MODERATION_BLOCKED.inc();
                Err(EngineError::ModeratedBlock(reason))
            }
            _ => Ok(()),
        }
    }
}
