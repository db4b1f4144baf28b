//! Room storage: records, lifecycle status, settings, and pins.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DbError, now_millis};

/// Room type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    Public,
    Private,
    Premium,
    Direct,
    Group,
    Stream,
    Support,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Public => "public",
            RoomType::Private => "private",
            RoomType::Premium => "premium",
            RoomType::Direct => "direct",
            RoomType::Group => "group",
            RoomType::Stream => "stream",
            RoomType::Support => "support",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "public" => RoomType::Public,
            "private" => RoomType::Private,
            "premium" => RoomType::Premium,
            "direct" => RoomType::Direct,
            "group" => RoomType::Group,
            "stream" => RoomType::Stream,
            "support" => RoomType::Support,
            _ => return None,
        })
    }
}

/// Room privacy mode, which gates how joins are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privacy {
    Public,
    Private,
    InviteOnly,
    Password,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
            Privacy::InviteOnly => "invite-only",
            Privacy::Password => "password",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "public" => Privacy::Public,
            "private" => Privacy::Private,
            "invite-only" => Privacy::InviteOnly,
            "password" => Privacy::Password,
            _ => return None,
        })
    }
}

/// Room lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    Inactive,
    Archived,
    Suspended,
    Deleted,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Inactive => "inactive",
            RoomStatus::Archived => "archived",
            RoomStatus::Suspended => "suspended",
            RoomStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => RoomStatus::Active,
            "inactive" => RoomStatus::Inactive,
            "archived" => RoomStatus::Archived,
            "suspended" => RoomStatus::Suspended,
            "deleted" => RoomStatus::Deleted,
            _ => return None,
        })
    }
}

/// A room row.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub id: i64,
    pub uuid: String,
    pub slug: Option<String>,
    pub name: String,
    pub room_type: RoomType,
    pub privacy: Privacy,
    pub status: RoomStatus,
    pub owner_id: i64,
    pub topic: Option<String>,
    pub max_members: i64,
    pub required_level: i64,
    pub password_hash: Option<String>,
    pub member_count: i64,
    pub message_count: i64,
    pub last_message_id: i64,
    pub last_activity_at: i64,
    pub created_at: i64,
}

/// Parameters for creating a room.
pub struct NewRoom<'a> {
    pub slug: Option<&'a str>,
    pub name: &'a str,
    pub room_type: RoomType,
    pub privacy: Privacy,
    pub owner_id: i64,
    pub topic: Option<&'a str>,
    pub max_members: i64,
    pub required_level: i64,
    pub password_hash: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: i64,
    uuid: String,
    slug: Option<String>,
    name: String,
    room_type: String,
    privacy: String,
    status: String,
    owner_id: i64,
    topic: Option<String>,
    max_members: i64,
    required_level: i64,
    password_hash: Option<String>,
    member_count: i64,
    message_count: i64,
    last_message_id: i64,
    last_activity_at: i64,
    created_at: i64,
}

const ROOM_COLUMNS: &str = "id, uuid, slug, name, room_type, privacy, status, owner_id, topic, \
     max_members, required_level, password_hash, member_count, message_count, \
     last_message_id, last_activity_at, created_at";

fn from_row(row: RoomRow) -> RoomRecord {
    let RoomRow {
        id,
        uuid,
        slug,
        name,
        room_type,
        privacy,
        status,
        owner_id,
        topic,
        max_members,
        required_level,
        password_hash,
        member_count,
        message_count,
        last_message_id,
        last_activity_at,
        created_at,
    } = row;
    RoomRecord {
        id,
        uuid,
        slug,
        name,
        room_type: RoomType::parse(&room_type).unwrap_or(RoomType::Public),
        privacy: Privacy::parse(&privacy).unwrap_or(Privacy::Public),
        status: RoomStatus::parse(&status).unwrap_or(RoomStatus::Active),
        owner_id,
        topic,
        max_members,
        required_level,
        password_hash,
        member_count,
        message_count,
        last_message_id,
        last_activity_at,
        created_at,
    }
}

/// Repository over rooms and room pins.
pub struct RoomRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a room. A duplicate slug surfaces as `Conflict`.
    pub async fn create(&self, params: NewRoom<'_>) -> Result<RoomRecord, DbError> {
        let now = now_millis();
        let uuid = Uuid::new_v4().to_string();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rooms (uuid, slug, name, room_type, privacy, status, owner_id, topic,
                               max_members, required_level, password_hash,
                               last_activity_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'active', ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&uuid)
        .bind(params.slug)
        .bind(params.name)
        .bind(params.room_type.as_str())
        .bind(params.privacy.as_str())
        .bind(params.owner_id)
        .bind(params.topic)
        .bind(params.max_members)
        .bind(params.required_level)
        .bind(&params.password_hash)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        self.fetch(id).await?.ok_or(DbError::NotFound)
    }

    /// Fetch a room by numeric id.
    pub async fn fetch(&self, id: i64) -> Result<Option<RoomRecord>, DbError> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?");
        let row: Option<RoomRow> = sqlx::query_as(&sql).bind(id).fetch_optional(self.pool).await?;
        Ok(row.map(from_row))
    }

    /// Fetch a room by slug.
    pub async fn fetch_by_slug(&self, slug: &str) -> Result<Option<RoomRecord>, DbError> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE slug = ?");
        let row: Option<RoomRow> = sqlx::query_as(&sql)
            .bind(slug)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// Update mutable settings (name, topic, privacy, caps, password).
    pub async fn update_settings(
        &self,
        id: i64,
        name: &str,
        topic: Option<&str>,
        privacy: Privacy,
        max_members: i64,
        required_level: i64,
        password_hash: Option<String>,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET name = ?, topic = ?, privacy = ?, max_members = ?, required_level = ?,
                password_hash = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(topic)
        .bind(privacy.as_str())
        .bind(max_members)
        .bind(required_level)
        .bind(&password_hash)
        .bind(now_millis())
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Transition the lifecycle status.
    pub async fn set_status(&self, id: i64, status: RoomStatus) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE rooms SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Change the recorded owner (the membership swap happens alongside).
    pub async fn set_owner(&self, id: i64, owner_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE rooms SET owner_id = ?, updated_at = ? WHERE id = ?")
            .bind(owner_id)
            .bind(now_millis())
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Adjust the cached member count.
    pub async fn bump_member_count(&self, id: i64, delta: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE rooms SET member_count = MAX(member_count + ?, 0), updated_at = ? WHERE id = ?",
        )
        .bind(delta)
        .bind(now_millis())
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Flip active rooms with no traffic for `days` to inactive.
    /// Direct conversations skip the inactive state.
    pub async fn sweep_inactive(&self, days: u32) -> Result<u64, DbError> {
        let cutoff = now_millis() - (days as i64) * 86_400_000;
        let result = sqlx::query(
            r#"
            UPDATE rooms SET status = 'inactive', updated_at = ?
            WHERE status = 'active' AND room_type != 'direct' AND last_activity_at < ?
            "#,
        )
        .bind(now_millis())
        .bind(cutoff)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Pin a message. Idempotent per (room, message).
    pub async fn pin_message(
        &self,
        room_id: i64,
        message_id: i64,
        pinned_by: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO room_pins (room_id, message_id, pinned_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(room_id)
        .bind(message_id)
        .bind(pinned_by)
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Unpin a message. A no-op when it was not pinned.
    pub async fn unpin_message(&self, room_id: i64, message_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM room_pins WHERE room_id = ? AND message_id = ?")
            .bind(room_id)
            .bind(message_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Pinned message ids for a room, newest pin first.
    pub async fn pinned_messages(&self, room_id: i64) -> Result<Vec<i64>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT message_id FROM room_pins WHERE room_id = ? ORDER BY created_at DESC",
        )
        .bind(room_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
