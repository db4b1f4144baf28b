//! Membership storage.
//!
//! One row per join stint; `left_at` closes a stint and a partial unique
//! index guarantees at most one active membership per (room, principal).
//! Ban state lives on the latest row so it survives the member leaving.

use sqlx::SqlitePool;

use super::{DbError, now_millis};
use crate::authz::{MembershipView, RoomRole};

/// A membership row.
#[derive(Debug, Clone)]
pub struct MembershipRecord {
    /// Row id; stints are addressed by (room, principal) in practice.
    #[allow(dead_code)]
    pub id: i64,
    pub room_id: i64,
    pub principal_id: i64,
    pub role: RoomRole,
    pub can_write: bool,
    pub can_moderate: bool,
    pub muted_until: Option<i64>,
    pub banned: bool,
    pub last_read_id: i64,
    pub joined_at: i64,
    /// Set when the stint ended; active rows have it NULL.
    #[allow(dead_code)]
    pub left_at: Option<i64>,
}

impl MembershipRecord {
    /// Project into the oracle's view of this membership.
    pub fn view(&self) -> MembershipView {
        MembershipView {
            role: self.role,
            can_write: self.can_write,
            can_moderate: self.can_moderate,
            muted_until: self
                .muted_until
                .and_then(chrono::DateTime::from_timestamp_millis),
            banned: self.banned,
        }
    }
}

type MembershipRow = (
    i64,
    i64,
    i64,
    String,
    bool,
    bool,
    Option<i64>,
    bool,
    i64,
    i64,
    Option<i64>,
);

const COLUMNS: &str = "id, room_id, principal_id, role, can_write, can_moderate, muted_until, \
     banned, last_read_id, joined_at, left_at";

fn from_row(row: MembershipRow) -> MembershipRecord {
    let (
        id,
        room_id,
        principal_id,
        role,
        can_write,
        can_moderate,
        muted_until,
        banned,
        last_read_id,
        joined_at,
        left_at,
    ) = row;
    MembershipRecord {
        id,
        room_id,
        principal_id,
        role: RoomRole::parse(&role).unwrap_or(RoomRole::Member),
        can_write,
        can_moderate,
        muted_until,
        banned,
        last_read_id,
        joined_at,
        left_at,
    }
}

/// Repository over memberships.
pub struct MembershipRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MembershipRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// The active membership for (room, principal), if any.
    pub async fn active(
        &self,
        room_id: i64,
        principal_id: i64,
    ) -> Result<Option<MembershipRecord>, DbError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id = ? AND principal_id = ? AND left_at IS NULL"
        );
        let row: Option<MembershipRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(principal_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// The most recent membership row regardless of state (ban checks).
    pub async fn latest(
        &self,
        room_id: i64,
        principal_id: i64,
    ) -> Result<Option<MembershipRecord>, DbError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id = ? AND principal_id = ? ORDER BY id DESC LIMIT 1"
        );
        let row: Option<MembershipRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(principal_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// Insert an active membership. An existing active row is a `Conflict`.
    pub async fn insert(
        &self,
        room_id: i64,
        principal_id: i64,
        role: RoomRole,
    ) -> Result<MembershipRecord, DbError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO memberships (room_id, principal_id, role, can_write, can_moderate, joined_at)
            VALUES (?, ?, ?, 1, ?, ?)
            RETURNING id
            "#,
        )
        .bind(room_id)
        .bind(principal_id)
        .bind(role.as_str())
        .bind(role >= RoomRole::Moderator)
        .bind(now_millis())
        .fetch_one(self.pool)
        .await?;

        let sql = format!("SELECT {COLUMNS} FROM memberships WHERE id = ?");
        let row: MembershipRow = sqlx::query_as(&sql).bind(id).fetch_one(self.pool).await?;
        Ok(from_row(row))
    }

    /// Close the active stint (leave or kick).
    pub async fn close(&self, room_id: i64, principal_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE memberships SET left_at = ? WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(now_millis())
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ban: close the active stint and mark the row banned.
    pub async fn ban(&self, room_id: i64, principal_id: i64) -> Result<(), DbError> {
        let now = now_millis();
        let updated = sqlx::query(
            "UPDATE memberships SET banned = 1, left_at = ? WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(now)
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Not currently a member: record the ban on the latest row, or
            // synthesize a closed banned row so the ban still holds.
            let touched = sqlx::query(
                r#"
                UPDATE memberships SET banned = 1
                WHERE id = (SELECT id FROM memberships WHERE room_id = ? AND principal_id = ?
                            ORDER BY id DESC LIMIT 1)
                "#,
            )
            .bind(room_id)
            .bind(principal_id)
            .execute(self.pool)
            .await?;
            if touched.rows_affected() == 0 {
                sqlx::query(
                    "INSERT INTO memberships (room_id, principal_id, role, banned, joined_at, left_at) VALUES (?, ?, 'member', 1, ?, ?)",
                )
                .bind(room_id)
                .bind(principal_id)
                .bind(now)
                .bind(now)
                .execute(self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Lift a ban. Rejoining still requires an explicit join.
    pub async fn unban(&self, room_id: i64, principal_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE memberships SET banned = 0
            WHERE id = (SELECT id FROM memberships WHERE room_id = ? AND principal_id = ?
                        AND banned = 1 ORDER BY id DESC LIMIT 1)
            "#,
        )
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether the principal is banned from the room.
    pub async fn is_banned(&self, room_id: i64, principal_id: i64) -> Result<bool, DbError> {
        Ok(self
            .latest(room_id, principal_id)
            .await?
            .map(|m| m.banned)
            .unwrap_or(false))
    }

    /// Set or clear the mute expiry on the active membership.
    pub async fn set_mute(
        &self,
        room_id: i64,
        principal_id: i64,
        muted_until: Option<i64>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE memberships SET muted_until = ? WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(muted_until)
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Change the room-scoped role on the active membership.
    pub async fn set_role(
        &self,
        room_id: i64,
        principal_id: i64,
        role: RoomRole,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE memberships SET role = ?, can_moderate = ? WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(role.as_str())
        .bind(role >= RoomRole::Moderator)
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomic ownership transfer: the old owner becomes an admin, the new
    /// owner takes the owner role, and the room row is updated, all in one
    /// transaction so there is exactly one owner at every observable point.
    pub async fn transfer_ownership(
        &self,
        room_id: i64,
        from: i64,
        to: i64,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let demoted = sqlx::query(
            "UPDATE memberships SET role = 'admin' WHERE room_id = ? AND principal_id = ? AND left_at IS NULL AND role = 'owner'",
        )
        .bind(room_id)
        .bind(from)
        .execute(&mut *tx)
        .await?;
        if demoted.rows_affected() == 0 {
            return Err(DbError::Conflict("transferor is not the owner".into()));
        }

        let promoted = sqlx::query(
            "UPDATE memberships SET role = 'owner', can_moderate = 1 WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(room_id)
        .bind(to)
        .execute(&mut *tx)
        .await?;
        if promoted.rows_affected() == 0 {
            return Err(DbError::Conflict("new owner is not a member".into()));
        }

        sqlx::query("UPDATE rooms SET owner_id = ?, updated_at = ? WHERE id = ?")
            .bind(to)
            .bind(now_millis())
            .bind(room_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Advance the last-read marker (monotonic; never moves backwards).
    pub async fn set_last_read(
        &self,
        room_id: i64,
        principal_id: i64,
        message_id: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE memberships SET last_read_id = MAX(last_read_id, ?) WHERE room_id = ? AND principal_id = ? AND left_at IS NULL",
        )
        .bind(message_id)
        .bind(room_id)
        .bind(principal_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// All active memberships of a room.
    pub async fn list_members(&self, room_id: i64) -> Result<Vec<MembershipRecord>, DbError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM memberships WHERE room_id = ? AND left_at IS NULL ORDER BY joined_at"
        );
        let rows: Vec<MembershipRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Room ids the principal is an active member of.
    pub async fn rooms_of(&self, principal_id: i64) -> Result<Vec<i64>, DbError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT room_id FROM memberships WHERE principal_id = ? AND left_at IS NULL",
        )
        .bind(principal_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Count of active members in a room.
    pub async fn count_active(&self, room_id: i64) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM memberships WHERE room_id = ? AND left_at IS NULL",
        )
        .bind(room_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Clear mutes whose expiry has passed. Returns affected (room, principal) pairs.
    pub async fn expire_mutes(&self) -> Result<Vec<(i64, i64)>, DbError> {
        let now = now_millis();
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT room_id, principal_id FROM memberships WHERE left_at IS NULL AND muted_until IS NOT NULL AND muted_until <= ?",
        )
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        if !rows.is_empty() {
            sqlx::query(
                "UPDATE memberships SET muted_until = NULL WHERE left_at IS NULL AND muted_until IS NOT NULL AND muted_until <= ?",
            )
            .bind(now)
            .execute(self.pool)
            .await?;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rooms::{NewRoom, Privacy, RoomType};
    use crate::db::test_db;

    async fn room(db: &crate::db::Database) -> i64 {
        db.rooms()
            .create(NewRoom {
                slug: Some("general"),
                name: "general",
                room_type: RoomType::Public,
                privacy: Privacy::Public,
                owner_id: 1,
                topic: None,
                max_members: 64,
                required_level: 0,
                password_hash: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn double_join_is_conflict() {
        let db = test_db().await;
        let room_id = room(&db).await;
        db.memberships()
            .insert(room_id, 2, RoomRole::Member)
            .await
            .unwrap();
        let err = db
            .memberships()
            .insert(room_id, 2, RoomRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn leave_then_rejoin_is_accepted() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();
        assert!(m.close(room_id, 2).await.unwrap());
        assert!(m.active(room_id, 2).await.unwrap().is_none());
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();
        assert!(m.active(room_id, 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ban_closes_membership_and_sticks() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();
        m.ban(room_id, 2).await.unwrap();

        assert!(m.active(room_id, 2).await.unwrap().is_none());
        assert!(m.is_banned(room_id, 2).await.unwrap());

        assert!(m.unban(room_id, 2).await.unwrap());
        assert!(!m.is_banned(room_id, 2).await.unwrap());
    }

    #[tokio::test]
    async fn ban_without_membership_still_sticks() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.ban(room_id, 9).await.unwrap();
        assert!(m.is_banned(room_id, 9).await.unwrap());
    }

    #[tokio::test]
    async fn ownership_transfer_is_atomic() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.insert(room_id, 1, RoomRole::Owner).await.unwrap();
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();

        m.transfer_ownership(room_id, 1, 2).await.unwrap();

        assert_eq!(m.active(room_id, 1).await.unwrap().unwrap().role, RoomRole::Admin);
        assert_eq!(m.active(room_id, 2).await.unwrap().unwrap().role, RoomRole::Owner);
        assert_eq!(db.rooms().fetch(room_id).await.unwrap().unwrap().owner_id, 2);

        // A second transfer from the demoted owner fails.
        let err = m.transfer_ownership(room_id, 1, 2).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn last_read_never_regresses() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();
        m.set_last_read(room_id, 2, 10).await.unwrap();
        m.set_last_read(room_id, 2, 4).await.unwrap();
        assert_eq!(m.active(room_id, 2).await.unwrap().unwrap().last_read_id, 10);
    }

    #[tokio::test]
    async fn mute_expiry_clears_and_reports() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let m = db.memberships();
        m.insert(room_id, 2, RoomRole::Member).await.unwrap();
        m.set_mute(room_id, 2, Some(now_millis() - 1000)).await.unwrap();

        let expired = m.expire_mutes().await.unwrap();
        assert_eq!(expired, vec![(room_id, 2)]);
        assert!(m.active(room_id, 2).await.unwrap().unwrap().muted_until.is_none());
    }
}
