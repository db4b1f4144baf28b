//! Presence registry.
//!
//! Maps principal → set of active connections and tracks typing indicators.
//! Presence is in-memory, sharded by principal-id hash to reduce
//! contention, with a periodic best-effort durable snapshot. Deltas are
//! broadcast best-effort; dropped deltas resolve at the next client list
//! refresh.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::state::ConnId;

/// Typing indicators auto-expire after this long without a refresh.
pub const TYPING_TTL: Duration = Duration::from_secs(5);

const SHARD_COUNT: usize = 16;

#[derive(Default)]
struct Shard {
    connections: HashMap<i64, HashSet<ConnId>>,
}

/// Sharded presence registry.
pub struct PresenceRegistry {
    shards: Vec<RwLock<Shard>>,
    /// (room, principal) → deadline after which the indicator expires.
    typing: RwLock<HashMap<(i64, i64), Instant>>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(Shard::default())).collect(),
            typing: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, principal_id: i64) -> &RwLock<Shard> {
        &self.shards[(principal_id.unsigned_abs() as usize) % SHARD_COUNT]
    }

    /// Register a connection. Returns true when this took the principal from
    /// offline to online (a presence delta worth broadcasting).
    pub fn mark_online(&self, principal_id: i64, conn: ConnId) -> bool {
        let mut shard = self.shard(principal_id).write();
        let set = shard.connections.entry(principal_id).or_default();
        let was_offline = set.is_empty();
        set.insert(conn);
        if was_offline {
            crate::metrics::ONLINE_PRINCIPALS.inc();
        }
        was_offline
    }

    /// Deregister a connection. Returns true when the principal went fully
    /// offline.
    pub fn mark_offline(&self, principal_id: i64, conn: ConnId) -> bool {
        let mut shard = self.shard(principal_id).write();
        let Some(set) = shard.connections.get_mut(&principal_id) else {
            return false;
        };
        set.remove(&conn);
        if set.is_empty() {
            shard.connections.remove(&principal_id);
            crate::metrics::ONLINE_PRINCIPALS.dec();
            true
        } else {
            false
        }
    }

    /// Whether the principal has any live connection.
    pub fn is_online(&self, principal_id: i64) -> bool {
        self.shard(principal_id)
            .read()
            .connections
            .contains_key(&principal_id)
    }

    /// Connection ids of one principal.
    pub fn connections_of(&self, principal_id: i64) -> Vec<ConnId> {
        self.shard(principal_id)
            .read()
            .connections
            .get(&principal_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Filter `candidates` down to the currently online ones.
    pub fn online_among(&self, candidates: &[i64]) -> Vec<i64> {
        candidates
            .iter()
            .copied()
            .filter(|id| self.is_online(*id))
            .collect()
    }

    /// Every online principal (snapshot task).
    pub fn all_online(&self) -> Vec<i64> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().connections.keys().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Start or refresh a typing indicator. Returns true when the indicator
    /// is new (worth broadcasting).
    pub fn start_typing(&self, room_id: i64, principal_id: i64) -> bool {
        let mut typing = self.typing.write();
        typing
            .insert((room_id, principal_id), Instant::now() + TYPING_TTL)
            .is_none()
    }

    /// Stop a typing indicator. Returns true when one was active.
    pub fn stop_typing(&self, room_id: i64, principal_id: i64) -> bool {
        self.typing.write().remove(&(room_id, principal_id)).is_some()
    }

    /// Principals currently typing in a room (expired entries pruned).
    pub fn list_typing(&self, room_id: i64) -> Vec<i64> {
        let now = Instant::now();
        let mut typing = self.typing.write();
        typing.retain(|_, deadline| *deadline > now);
        typing
            .keys()
            .filter(|(room, _)| *room == room_id)
            .map(|(_, principal)| *principal)
            .collect()
    }

    /// Remove expired indicators, returning them so expiry can be broadcast
    /// as a stop delta.
    pub fn sweep_typing(&self) -> Vec<(i64, i64)> {
        let now = Instant::now();
        let mut typing = self.typing.write();
        let expired: Vec<(i64, i64)> = typing
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            typing.remove(key);
        }
        expired
    }

    /// Clear all typing state of one principal (on disconnect). Returns the
    /// rooms that had an active indicator.
    pub fn clear_typing_of(&self, principal_id: i64) -> Vec<i64> {
        let mut typing = self.typing.write();
        let rooms: Vec<i64> = typing
            .keys()
            .filter(|(_, p)| *p == principal_id)
            .map(|(room, _)| *room)
            .collect();
        for room in &rooms {
            typing.remove(&(*room, principal_id));
        }
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_connection_is_a_delta_second_is_not() {
        let presence = PresenceRegistry::new();
        assert!(presence.mark_online(1, ConnId(10)));
        assert!(!presence.mark_online(1, ConnId(11)));
        assert!(presence.is_online(1));

        // Only the last disconnect is a delta.
        assert!(!presence.mark_offline(1, ConnId(10)));
        assert!(presence.mark_offline(1, ConnId(11)));
        assert!(!presence.is_online(1));
    }

    #[test]
    fn online_among_filters() {
        let presence = PresenceRegistry::new();
        presence.mark_online(1, ConnId(1));
        presence.mark_online(3, ConnId(2));
        assert_eq!(presence.online_among(&[1, 2, 3, 4]), vec![1, 3]);
    }

    #[test]
    fn typing_start_refresh_stop() {
        let presence = PresenceRegistry::new();
        assert!(presence.start_typing(7, 1));
        // Refresh is not a new delta.
        assert!(!presence.start_typing(7, 1));
        assert_eq!(presence.list_typing(7), vec![1]);
        assert!(presence.stop_typing(7, 1));
        assert!(!presence.stop_typing(7, 1));
        assert!(presence.list_typing(7).is_empty());
    }

    #[test]
    fn typing_is_scoped_per_room() {
        let presence = PresenceRegistry::new();
        presence.start_typing(7, 1);
        presence.start_typing(8, 1);
        assert_eq!(presence.list_typing(7), vec![1]);
        assert_eq!(presence.clear_typing_of(1).len(), 2);
        assert!(presence.list_typing(7).is_empty());
        assert!(presence.list_typing(8).is_empty());
    }

    #[test]
    fn sweep_returns_nothing_while_fresh() {
        let presence = PresenceRegistry::new();
        presence.start_typing(7, 1);
        assert!(presence.sweep_typing().is_empty());
        assert_eq!(presence.list_typing(7), vec![1]);
    }

    #[test]
    fn mark_offline_unknown_principal_is_noop() {
        let presence = PresenceRegistry::new();
        assert!(!presence.mark_offline(42, ConnId(1)));
    }
}
