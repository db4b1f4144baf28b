//! State management module.
//!
//! Contains the Hub (shared server state), the per-room actors that own all
//! mutable room state, and the connection registry.

mod connections;
mod hub;
mod room_actor;
mod room_manager;
mod room_types;

pub use connections::{ConnectionHandle, ConnectionManager};
pub use hub::{Hub, HubParams, Lifecycle};
pub use room_manager::RoomManager;
pub use room_types::{
    PostParams, PostReceipt, RoomCommand, RoomDescription, RoomError, SettingsChange, Subscriber,
};

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier of one client connection.
///
/// Room actors hold only these (plus an outbound sender); the strong
/// references to live connections stay with the Connection Supervisor,
/// which breaks the connection ↔ room reference cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Process-wide connection id allocator.
#[derive(Debug, Default)]
pub struct ConnIdGenerator {
    next: AtomicU64,
}

impl ConnIdGenerator {
    /// Allocate the next id.
    pub fn next(&self) -> ConnId {
        ConnId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_ids_are_unique_and_increasing() {
        let generator = ConnIdGenerator::default();
        let a = generator.next();
        let b = generator.next();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }
}
