//! Room manager: spawns and indexes per-room actors.
//!
//! Actors are loaded lazily from persistence the first time a room is
//! addressed and stay resident until the room is deleted. The manager owns
//! only mailboxes; all room state lives inside the actors.

use dashmap::DashMap;
use palaver_proto::RoomTarget;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::room_actor::RoomActor;
use super::room_types::{RoomCommand, RoomDescription, RoomError};
use super::Hub;
use crate::db::{Database, DbError, NewRoom, RoomRecord};
use crate::error::{EngineError, EngineResult};

/// Registry of live room actors.
pub struct RoomManager {
    rooms: DashMap<i64, mpsc::Sender<RoomCommand>>,
    slugs: DashMap<String, i64>,
    db: Database,
    hub: RwLock<Weak<Hub>>,
}

impl RoomManager {
    /// Create the manager. `attach` must be called once the Hub exists.
    pub fn new(db: Database) -> Self {
        Self {
            rooms: DashMap::new(),
            slugs: DashMap::new(),
            db,
            hub: RwLock::new(Weak::new()),
        }
    }

    /// Wire the back-reference to the Hub (called from `Hub::new`).
    pub fn attach(&self, hub: Weak<Hub>) {
        *self.hub.write() = hub;
    }

    fn hub(&self) -> Weak<Hub> {
        self.hub.read().clone()
    }

    /// Resolve a wire room reference to a numeric id.
    pub async fn resolve(&self, target: &RoomTarget) -> EngineResult<i64> {
        match target {
            RoomTarget::Id(id) => Ok(*id),
            RoomTarget::Slug(slug) => {
                if let Some(id) = self.slugs.get(slug.as_str()) {
                    return Ok(*id);
                }
                let room = self
                    .db
                    .rooms()
                    .fetch_by_slug(slug)
                    .await?
                    .ok_or(EngineError::NotFound("room"))?;
                self.slugs.insert(slug.clone(), room.id);
                Ok(room.id)
            }
        }
    }

    /// The mailbox of a room's actor, spawning it from persistence when it
    /// is not yet resident.
    pub async fn get_or_spawn(&self, room_id: i64) -> EngineResult<mpsc::Sender<RoomCommand>> {
        if let Some(tx) = self.rooms.get(&room_id) {
            return Ok(tx.clone());
        }

        let record = self
            .db
            .rooms()
            .fetch(room_id)
            .await?
            .ok_or(EngineError::NotFound("room"))?;
        let members = self.db.memberships().list_members(room_id).await?;
        let pinned = self.db.rooms().pinned_messages(room_id).await?;
        let direct = if record.room_type == crate::db::RoomType::Direct {
            self.db.directs().fetch_by_room(room_id).await?
        } else {
            None
        };

        if let Some(slug) = &record.slug {
            self.slugs.insert(slug.clone(), room_id);
        }

        // Two loaders can race; the first insert wins and the loser's state
        // is discarded before an actor is spawned for it.
        use dashmap::mapref::entry::Entry;
        match self.rooms.entry(room_id) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let tx = RoomActor::spawn(
                    record,
                    members,
                    pinned,
                    direct,
                    self.db.clone(),
                    self.hub(),
                );
                slot.insert(tx.clone());
                debug!(room = room_id, "room actor spawned");
                Ok(tx)
            }
        }
    }

    /// The mailbox of an already-resident actor, without loading.
    pub fn resident(&self, room_id: i64) -> Option<mpsc::Sender<RoomCommand>> {
        self.rooms.get(&room_id).map(|tx| tx.clone())
    }

    /// Drop an actor (deleted rooms). Its mailbox closes once in-flight
    /// senders finish.
    pub fn evict(&self, room_id: i64) {
        if self.rooms.remove(&room_id).is_some() {
            info!(room = room_id, "room actor evicted");
        }
    }

    /// Number of resident actors.
    pub fn resident_count(&self) -> usize {
        self.rooms.len()
    }

    /// Create a room, spawn its actor, and make the creator the owner
    /// member.
    pub async fn create_room(&self, params: NewRoom<'_>) -> EngineResult<RoomRecord> {
        let owner_id = params.owner_id;
        let record = self.db.rooms().create(params).await.map_err(|e| match e {
            DbError::Conflict(msg) => EngineError::Conflict(msg),
            other => other.into(),
        })?;

        self.db
            .memberships()
            .insert(record.id, owner_id, crate::authz::RoomRole::Owner)
            .await?;
        self.db.rooms().bump_member_count(record.id, 1).await?;

        if let Some(slug) = &record.slug {
            self.slugs.insert(slug.clone(), record.id);
        }
        info!(room = record.id, slug = ?record.slug, owner = owner_id, "room created");

        // Spawn eagerly so the owner's subscribe finds it resident.
        let _ = self.get_or_spawn(record.id).await?;
        Ok(record)
    }

    /// Ask a room to describe itself from the caller's perspective.
    pub async fn describe(
        &self,
        room_id: i64,
        principal_id: i64,
    ) -> EngineResult<RoomDescription> {
        let tx = self.get_or_spawn(room_id).await?;
        let (reply, rx) = oneshot::channel();
        tx.send(RoomCommand::Describe { principal_id, reply })
            .await
            .map_err(|_| EngineError::NotFound("room"))?;
        rx.await
            .map_err(|_| EngineError::Internal("room actor dropped a describe".into()))
    }

    /// Send a command that carries a `Result<T, RoomError>` reply and wait
    /// for it.
    pub async fn call<T>(
        &self,
        room_id: i64,
        make: impl FnOnce(oneshot::Sender<Result<T, RoomError>>) -> RoomCommand,
    ) -> EngineResult<T> {
        let tx = self.get_or_spawn(room_id).await?;
        let (reply, rx) = oneshot::channel();
        tx.send(make(reply))
            .await
            .map_err(|_| EngineError::NotFound("room"))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Internal("room actor dropped a reply".into()))?;
        result.map_err(EngineError::from)
    }

    /// Fire a no-reply command at a resident actor (presence deltas etc.).
    pub fn notify_resident(&self, room_id: i64, command: RoomCommand) {
        if let Some(tx) = self.resident(room_id) {
            let _ = tx.try_send(command);
        }
    }
}
