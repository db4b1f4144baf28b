//! Connection - the lifecycle of one authenticated client session.
//!
//! Each connection runs a single unified task:
//!
//! ```text
//!    ┌─────────────────────────────────────────────────────┐
//!    │               Unified Connection Task               │
//!    │                                                     │
//!    │   WebSocket read ──► decode ──► MessageRouter       │
//!    │        ▲                             │              │
//!    │        │        tokio::select!      ▼              │
//!    │   heartbeat tick            [Outbound Queue rx]     │
//!    │        │                             │              │
//!    │        └────────► WebSocket write ◄──┘              │
//!    └─────────────────────────────────────────────────────┘
//! ```
//!
//! Commands are read, processed, and acknowledged strictly in order. The
//! bounded outbound queue is the back-pressure point: room actors enqueue
//! with `try_send`, and a queue that stays full past the grace window gets
//! the connection closed as a slow consumer. Closing cancels the task and
//! deregisters the connection from presence and every room subscription.

use futures_util::{SinkExt, StreamExt};
use palaver_proto::{ClientCommand, ClientFrame, ErrorData, PresenceData, ServerEvent};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::Principal;
use crate::router::{ConnCtx, MessageRouter};
use crate::state::{ConnectionHandle, Hub, RoomCommand};

/// Close the connection after this many heartbeats without a pong.
const MAX_MISSED_PINGS: u8 = 2;

/// One authenticated client session.
pub struct Connection {
    hub: Arc<Hub>,
    router: Arc<MessageRouter>,
    principal: Principal,
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
}

impl Connection {
    pub fn new(
        hub: Arc<Hub>,
        router: Arc<MessageRouter>,
        principal: Principal,
        ws: WebSocketStream<TcpStream>,
        addr: SocketAddr,
    ) -> Self {
        Self {
            hub,
            router,
            principal,
            ws,
            addr,
        }
    }

    /// Run the connection until close, then tear everything down.
    #[instrument(skip(self), fields(principal = self.principal.id, addr = %self.addr), name = "connection")]
    pub async fn run(self) -> anyhow::Result<()> {
        let Connection {
            hub,
            router,
            principal,
            ws,
            addr: _,
        } = self;

        let conn_id = hub.conn_ids.next();
        let (tx, mut rx) = mpsc::channel::<Arc<ServerEvent>>(hub.settings.send_queue_capacity);
        let cancel = CancellationToken::new();

        hub.connections.register(ConnectionHandle {
            conn_id,
            principal: principal.clone(),
            tx: tx.clone(),
            cancel: cancel.clone(),
        });

        // The reputation gate reads from cache only; warm it now.
        hub.reputation.preload(principal.id).await;

        let came_online = hub.presence.mark_online(principal.id, conn_id);

        let mut ctx = ConnCtx {
            conn_id,
            principal: principal.clone(),
            tx: tx.clone(),
            subscriptions: HashSet::new(),
        };

        // Subscribe to the default room set: every room this principal is a
        // member of.
        match hub.db.memberships().rooms_of(principal.id).await {
            Ok(rooms) => {
                for room_id in rooms {
                    if let Err(e) = router.subscribe_conn(&mut ctx, room_id).await {
                        debug!(room = room_id, error = %e, "default subscription skipped");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to load default room set");
            }
        }

        if came_online {
            broadcast_presence(&hub, &ctx, &principal, true);
        }

        info!(
            server = %hub.settings.server_name,
            conn = %conn_id,
            rooms = ctx.subscriptions.len(),
            "session established"
        );

        let close_reason = event_loop(&hub, &router, &mut ctx, ws, &mut rx, &cancel).await;

        // Teardown: cancel mirrors the external-close path, then every
        // registry learns the connection is gone.
        cancel.cancel();
        hub.connections.deregister(conn_id);
        for room_id in &ctx.subscriptions {
            hub.rooms
                .notify_resident(*room_id, RoomCommand::ConnectionClosed { conn_id });
        }

        for room_id in hub.presence.clear_typing_of(principal.id) {
            let event = Arc::new(ServerEvent::Typing(palaver_proto::TypingData {
                room_id,
                principal_id: principal.id,
                display_name: principal.display_name.clone(),
                typing: false,
            }));
            hub.rooms.notify_resident(
                room_id,
                RoomCommand::Broadcast {
                    event,
                    staff_only: false,
                    exclude: Some(conn_id),
                },
            );
        }

        let went_offline = hub.presence.mark_offline(principal.id, conn_id);
        if went_offline {
            broadcast_presence(&hub, &ctx, &principal, false);
            hub.reputation.forget(principal.id);
        }

        info!(conn = %conn_id, reason = close_reason, "session closed");
        Ok(())
    }
}

/// Publish a presence delta to every room this connection follows.
/// Best-effort: deltas to non-resident rooms are dropped and resolved at
/// the next client list refresh.
fn broadcast_presence(hub: &Hub, ctx: &ConnCtx, principal: &Principal, online: bool) {
    let event = Arc::new(ServerEvent::Presence(PresenceData {
        principal_id: principal.id,
        display_name: principal.display_name.clone(),
        online,
    }));
    for room_id in &ctx.subscriptions {
        hub.rooms.notify_resident(
            *room_id,
            RoomCommand::Broadcast {
                event: Arc::clone(&event),
                staff_only: false,
                exclude: Some(ctx.conn_id),
            },
        );
    }
}

/// The unified read/write/heartbeat loop. Returns the close reason.
async fn event_loop(
    hub: &Hub,
    router: &MessageRouter,
    ctx: &mut ConnCtx,
    ws: WebSocketStream<TcpStream>,
    rx: &mut mpsc::Receiver<Arc<ServerEvent>>,
    cancel: &CancellationToken,
) -> &'static str {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = tokio::time::interval(hub.settings.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; it seeds the ping cycle.
    let mut pending_pings: u8 = 0;
    let mut shutdown = hub.shutdown_signal();
    let queue_capacity = hub.settings.send_queue_capacity;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return "closed by server";
            }
            _ = shutdown.recv() => {
                let _ = sink.close().await;
                return "server shutdown";
            }
            _ = heartbeat.tick() => {
                if pending_pings >= MAX_MISSED_PINGS {
                    let _ = sink.close().await;
                    return "ping timeout";
                }
                pending_pings += 1;
                if sink.send(WsMessage::Text(ServerEvent::Ping.to_json())).await.is_err() {
                    return "write failed";
                }
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    return "outbound queue dropped";
                };
                let is_fatal_error = matches!(
                    event.as_ref(),
                    ServerEvent::Error(ErrorData { code, .. })
                        if *code == palaver_proto::ErrorCode::SlowConsumer
                );
                if sink.send(WsMessage::Text(event.to_json())).await.is_err() {
                    return "write failed";
                }
                if is_fatal_error {
                    let _ = sink.close().await;
                    return "slow consumer";
                }
                // Backlog drained below half capacity: congestion is over.
                if rx.len() < queue_capacity / 2 {
                    hub.connections.clear_congested(ctx.conn_id);
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match ClientFrame::decode(&text) {
                            Ok(decoded) => {
                                if matches!(decoded.command, ClientCommand::Pong) {
                                    pending_pings = 0;
                                    continue;
                                }
                                router.handle(ctx, decoded).await;
                            }
                            Err(e) => {
                                let err: crate::error::EngineError = e.into();
                                let event = ServerEvent::Error(err.to_error_data(None));
                                if ctx.tx.try_send(Arc::new(event)).is_err() {
                                    hub.connections.note_congested(ctx.conn_id);
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        pending_pings = 0;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        let event = ServerEvent::Error(ErrorData::new(
                            palaver_proto::ErrorCode::ValidationFailed,
                            "binary frames are not part of the protocol",
                        ));
                        let _ = ctx.tx.try_send(Arc::new(event));
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return "client closed";
                    }
                    Some(Ok(WsMessage::Frame(_))) => {
                        // Raw frames do not surface from a configured stream.
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "read error");
                        return "read failed";
                    }
                }
            }
        }
    }
}
