//! The Hub - central shared state for the chat engine.
//!
//! The Hub is the composition root's state: a dependency-injection
//! container holding every service the pipeline needs. Nothing here is a
//! hidden global; `main` builds one Hub and hands `Arc<Hub>` to the
//! gateway, the router, and the background tasks.
//!
//! Ownership rules:
//! - The Connection Supervisor (via [`ConnectionManager`]) exclusively owns
//!   live connections.
//! - Each room actor exclusively owns its room's mutable state; the
//!   [`RoomManager`] holds only mailboxes.
//! - Room actors refer to connections solely by [`super::ConnId`] plus an
//!   outbound sender, never by a strong connection reference.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use super::{ConnIdGenerator, ConnectionManager, RoomManager};
use crate::auth::TokenVerifier;
use crate::authz::PermissionOracle;
use crate::config::{Config, RoomsConfig};
use crate::db::{CacheStore, Database};
use crate::limits::RateLimitService;
use crate::moderation::{ModerationPipeline, ReputationStore};
use crate::presence::PresenceRegistry;

/// Shutdown signaling shared by every long-lived task.
pub struct Lifecycle {
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }
}

/// Engine settings distilled from the config file.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub server_name: String,
    pub send_queue_capacity: usize,
    pub heartbeat: Duration,
    pub max_connections: usize,
    pub rooms: RoomsConfig,
}

/// Inputs for building the Hub.
pub struct HubParams<'a> {
    pub config: &'a Config,
    pub db: Database,
    pub cache: CacheStore,
}

/// Central shared state container.
pub struct Hub {
    pub settings: EngineSettings,
    pub db: Database,
    pub cache: CacheStore,
    pub verifier: TokenVerifier,
    pub oracle: PermissionOracle,
    pub limits: RateLimitService,
    pub moderation: ModerationPipeline,
    pub reputation: Arc<ReputationStore>,
    pub presence: PresenceRegistry,
    pub rooms: RoomManager,
    pub connections: ConnectionManager,
    pub conn_ids: ConnIdGenerator,
    pub lifecycle: Lifecycle,
    /// Readiness of the persistence primary, maintained by a prober task.
    ready: AtomicBool,
}

impl Hub {
    /// Build the Hub and wire the room manager's back-reference.
    pub fn new(params: HubParams<'_>) -> std::io::Result<Arc<Self>> {
        let config = params.config;

        let settings = EngineSettings {
            server_name: config.server.name.clone(),
            send_queue_capacity: config.server.send_queue_capacity,
            heartbeat: Duration::from_secs(config.server.heartbeat_secs),
            max_connections: config.server.max_connections,
            rooms: config.rooms.clone(),
        };

        let verifier = TokenVerifier::new(
            &config.auth.signing_key,
            &config.auth.issuer,
            Duration::from_secs(config.auth.principal_cache_secs),
            params.db.clone(),
        );

        let reputation = Arc::new(ReputationStore::new(params.db.pool().clone()));
        let moderation =
            ModerationPipeline::from_config(&config.moderation, Arc::clone(&reputation))?;

        let hub = Arc::new(Self {
            verifier,
            oracle: PermissionOracle,
            limits: RateLimitService::new(config.limits.clone()),
            moderation,
            reputation,
            presence: PresenceRegistry::new(),
            rooms: RoomManager::new(params.db.clone()),
            connections: ConnectionManager::new(Duration::from_millis(
                config.server.slow_consumer_grace_ms,
            )),
            conn_ids: ConnIdGenerator::default(),
            lifecycle: Lifecycle::default(),
            ready: AtomicBool::new(true),
            settings,
            db: params.db,
            cache: params.cache,
        });

        hub.rooms.attach(Arc::downgrade(&hub));
        Ok(hub)
    }

    /// Whether the engine should report ready (primary store reachable).
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Update readiness (called by the prober task).
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.lifecycle.shutdown_tx.subscribe()
    }
}
