//! Connection registry.
//!
//! The Connection Supervisor owns Connections exclusively; this registry
//! holds the handles (outbound sender + cancellation token) that the rest
//! of the engine uses to reach them. It also tracks slow-consumer state:
//! a queue that stays full past the grace window gets the connection
//! closed.

use dashmap::DashMap;
use palaver_proto::{ErrorCode, ErrorData, ServerEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ConnId;
use crate::auth::Principal;

/// Handle to one live connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    pub principal: Principal,
    pub tx: mpsc::Sender<Arc<ServerEvent>>,
    pub cancel: CancellationToken,
}

/// Registry of live connections plus slow-consumer bookkeeping.
pub struct ConnectionManager {
    connections: DashMap<ConnId, ConnectionHandle>,
    /// Connections whose outbound queue was observed full, and when first.
    congested: DashMap<ConnId, Instant>,
    grace: Duration,
}

impl ConnectionManager {
    /// Create the registry with the configured slow-consumer grace window.
    pub fn new(grace: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            congested: DashMap::new(),
            grace,
        }
    }

    /// Register a connection.
    pub fn register(&self, handle: ConnectionHandle) {
        crate::metrics::OPEN_CONNECTIONS.inc();
        self.connections.insert(handle.conn_id, handle);
    }

    /// Deregister a connection. Returns the handle when it was present.
    pub fn deregister(&self, conn_id: ConnId) -> Option<ConnectionHandle> {
        self.congested.remove(&conn_id);
        let removed = self.connections.remove(&conn_id).map(|(_, h)| h);
        if removed.is_some() {
            crate::metrics::OPEN_CONNECTIONS.dec();
        }
        removed
    }

    /// Look up a handle.
    pub fn get(&self, conn_id: ConnId) -> Option<ConnectionHandle> {
        self.connections.get(&conn_id).map(|h| h.clone())
    }

    /// Number of live connections.
    #[allow(dead_code)] // Available for STATS-style queries
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Every connection of one principal.
    pub fn of_principal(&self, principal_id: i64) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .filter(|h| h.principal.id == principal_id)
            .map(|h| h.clone())
            .collect()
    }

    /// Distinct principal ids with a live connection.
    pub fn connected_principals(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.connections.iter().map(|h| h.principal.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Record that `conn_id`'s queue was observed full during a broadcast.
    ///
    /// The first observation starts the grace window; observations past the
    /// window close the connection with `slow-consumer`. The broadcast loop
    /// itself never blocks on the slow subscriber.
    pub fn note_congested(&self, conn_id: ConnId) {
        use dashmap::mapref::entry::Entry;
        match self.congested.entry(conn_id) {
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            }
            Entry::Occupied(first_seen) => {
                if first_seen.get().elapsed() >= self.grace {
                    drop(first_seen);
                    warn!(conn = %conn_id, "outbound queue full past grace window");
                    self.close(conn_id, ErrorCode::SlowConsumer, "outbound queue overflow");
                }
            }
        }
    }

    /// Clear the congestion mark once the writer has drained its backlog.
    pub fn clear_congested(&self, conn_id: ConnId) {
        self.congested.remove(&conn_id);
    }

    /// Forcibly close a connection: best-effort error frame, then cancel.
    pub fn close(&self, conn_id: ConnId, code: ErrorCode, message: &str) {
        if let Some(handle) = self.get(conn_id) {
            if code == ErrorCode::SlowConsumer {
                crate::metrics::SLOW_CONSUMER_CLOSES.inc();
            }
            let _ = handle.tx.try_send(Arc::new(ServerEvent::Error(ErrorData::new(
                code,
                message.to_string(),
            ))));
            handle.cancel.cancel();
            info!(conn = %conn_id, code = %code, "connection close requested");
        }
    }

    /// Close every connection of a principal (status change enforcement).
    pub fn close_principal(&self, principal_id: i64, code: ErrorCode, message: &str) {
        for handle in self.of_principal(principal_id) {
            self.close(handle.conn_id, code, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{GlobalRole, PrincipalStatus};

    fn principal(id: i64) -> Principal {
        Principal {
            id,
            display_name: format!("p{id}"),
            role: GlobalRole::User,
            status: PrincipalStatus::Active,
            email_verified: true,
        }
    }

    fn handle(conn: u64, principal_id: i64) -> (ConnectionHandle, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(4);
        (
            ConnectionHandle {
                conn_id: ConnId(conn),
                principal: principal(principal_id),
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    #[test]
    fn register_lookup_deregister() {
        let manager = ConnectionManager::new(Duration::from_secs(2));
        let (h, _rx) = handle(1, 7);
        manager.register(h);
        assert!(manager.get(ConnId(1)).is_some());
        assert_eq!(manager.of_principal(7).len(), 1);
        assert!(manager.deregister(ConnId(1)).is_some());
        assert!(manager.get(ConnId(1)).is_none());
        assert!(manager.deregister(ConnId(1)).is_none());
    }

    #[test]
    fn congestion_within_grace_does_not_close() {
        let manager = ConnectionManager::new(Duration::from_secs(60));
        let (h, _rx) = handle(1, 7);
        let cancel = h.cancel.clone();
        manager.register(h);

        manager.note_congested(ConnId(1));
        manager.note_congested(ConnId(1));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn congestion_past_grace_closes_with_slow_consumer() {
        let manager = ConnectionManager::new(Duration::ZERO);
        let (h, mut rx) = handle(1, 7);
        let cancel = h.cancel.clone();
        manager.register(h);

        manager.note_congested(ConnId(1));
        // Grace of zero: the second observation is already past the window.
        manager.note_congested(ConnId(1));
        assert!(cancel.is_cancelled());

        let event = rx.try_recv().unwrap();
        match event.as_ref() {
            ServerEvent::Error(data) => assert_eq!(data.code, ErrorCode::SlowConsumer),
            other => panic!("expected error event, got {}", other.kind()),
        }
    }

    #[test]
    fn drain_clears_congestion_mark() {
        let manager = ConnectionManager::new(Duration::ZERO);
        let (h, _rx) = handle(1, 7);
        let cancel = h.cancel.clone();
        manager.register(h);

        manager.note_congested(ConnId(1));
        manager.clear_congested(ConnId(1));
        manager.note_congested(ConnId(1));
        // Each observation restarted the window; never past grace twice.
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn close_principal_hits_all_connections() {
        let manager = ConnectionManager::new(Duration::from_secs(2));
        let (h1, _rx1) = handle(1, 7);
        let (h2, _rx2) = handle(2, 7);
        let (h3, _rx3) = handle(3, 8);
        let c1 = h1.cancel.clone();
        let c2 = h2.cancel.clone();
        let c3 = h3.cancel.clone();
        manager.register(h1);
        manager.register(h2);
        manager.register(h3);

        manager.close_principal(7, ErrorCode::Unauthenticated, "suspended");
        assert!(c1.is_cancelled());
        assert!(c2.is_cancelled());
        assert!(!c3.is_cancelled());
    }
}
