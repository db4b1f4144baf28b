//! Direct conversations.
//!
//! A direct conversation is a room of type `direct` with exactly two
//! members, uniquely keyed by the ordered pair (user1_id < user2_id).
//! Blocking hides new messages from both sides but records which side
//! initiated it.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DbError, now_millis};

/// One direct-conversation row.
#[derive(Debug, Clone)]
pub struct DirectConversation {
    pub room_id: i64,
    pub user1_id: i64,
    pub user2_id: i64,
    pub blocked: bool,
    pub blocker_id: Option<i64>,
    #[allow(dead_code)] // Surfaced through client list refreshes
    pub archived: bool,
    #[allow(dead_code)]
    pub last_activity_at: i64,
}

/// Canonicalize a principal pair.
pub fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a < b { (a, b) } else { (b, a) }
}

/// Repository over direct conversations.
pub struct DirectRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DirectRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch the conversation between two principals, if one exists.
    pub async fn fetch(&self, a: i64, b: i64) -> Result<Option<DirectConversation>, DbError> {
        let (u1, u2) = canonical_pair(a, b);
        let row: Option<(i64, i64, i64, bool, Option<i64>, bool, i64)> = sqlx::query_as(
            r#"
            SELECT room_id, user1_id, user2_id, blocked, blocker_id, archived, last_activity_at
            FROM direct_conversations WHERE user1_id = ? AND user2_id = ?
            "#,
        )
        .bind(u1)
        .bind(u2)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(
            |(room_id, user1_id, user2_id, blocked, blocker_id, archived, last_activity_at)| {
                DirectConversation {
                    room_id,
                    user1_id,
                    user2_id,
                    blocked,
                    blocker_id,
                    archived,
                    last_activity_at,
                }
            },
        ))
    }

    /// Fetch by room id.
    pub async fn fetch_by_room(&self, room_id: i64) -> Result<Option<DirectConversation>, DbError> {
        let row: Option<(i64, i64, i64, bool, Option<i64>, bool, i64)> = sqlx::query_as(
            r#"
            SELECT room_id, user1_id, user2_id, blocked, blocker_id, archived, last_activity_at
            FROM direct_conversations WHERE room_id = ?
            "#,
        )
        .bind(room_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(
            |(room_id, user1_id, user2_id, blocked, blocker_id, archived, last_activity_at)| {
                DirectConversation {
                    room_id,
                    user1_id,
                    user2_id,
                    blocked,
                    blocker_id,
                    archived,
                    last_activity_at,
                }
            },
        ))
    }

    /// Get or create the conversation between two principals.
    ///
    /// Creation is transactional: the backing room (type `direct`, skipping
    /// the `inactive` state machine), both memberships, and the canonical
    /// pair row appear together. Returns (conversation, created).
    pub async fn get_or_create(
        &self,
        a: i64,
        b: i64,
    ) -> Result<(DirectConversation, bool), DbError> {
        if a == b {
            return Err(DbError::ConstraintViolation(
                "a direct conversation needs two distinct principals".into(),
            ));
        }
        if let Some(existing) = self.fetch(a, b).await? {
            return Ok((existing, false));
        }

        let (u1, u2) = canonical_pair(a, b);
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let room_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rooms (uuid, slug, name, room_type, privacy, status, owner_id,
                               max_members, member_count, last_activity_at, created_at, updated_at)
            VALUES (?, NULL, ?, 'direct', 'private', 'active', ?, 2, 2, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(format!("dm:{u1}:{u2}"))
        .bind(u1)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for principal in [u1, u2] {
            sqlx::query(
                "INSERT INTO memberships (room_id, principal_id, role, can_write, joined_at) VALUES (?, ?, 'member', 1, ?)",
            )
            .bind(room_id)
            .bind(principal)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO direct_conversations (room_id, user1_id, user2_id, last_activity_at) VALUES (?, ?, ?, ?)",
        )
        .bind(room_id)
        .bind(u1)
        .bind(u2)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a race; the other writer's row wins.
            drop(tx);
            let existing = self.fetch(a, b).await?.ok_or(DbError::NotFound)?;
            return Ok((existing, false));
        }

        tx.commit().await?;

        Ok((
            DirectConversation {
                room_id,
                user1_id: u1,
                user2_id: u2,
                blocked: false,
                blocker_id: None,
                archived: false,
                last_activity_at: now,
            },
            true,
        ))
    }

    /// Block the conversation. `blocker` must be one of the two members.
    pub async fn block(&self, room_id: i64, blocker: i64) -> Result<(), DbError> {
        let conv = self.fetch_by_room(room_id).await?.ok_or(DbError::NotFound)?;
        if blocker != conv.user1_id && blocker != conv.user2_id {
            return Err(DbError::Conflict("blocker is not a party".into()));
        }
        sqlx::query(
            "UPDATE direct_conversations SET blocked = 1, blocker_id = ? WHERE room_id = ?",
        )
        .bind(blocker)
        .bind(room_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Unblock. Only the original blocker may lift the block.
    pub async fn unblock(&self, room_id: i64, principal: i64) -> Result<(), DbError> {
        let conv = self.fetch_by_room(room_id).await?.ok_or(DbError::NotFound)?;
        if conv.blocker_id != Some(principal) {
            return Err(DbError::Conflict("only the blocker may unblock".into()));
        }
        sqlx::query(
            "UPDATE direct_conversations SET blocked = 0, blocker_id = NULL WHERE room_id = ?",
        )
        .bind(room_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Set the archived flag.
    #[allow(dead_code)] // Exposed through client conversation management
    pub async fn set_archived(&self, room_id: i64, archived: bool) -> Result<(), DbError> {
        sqlx::query("UPDATE direct_conversations SET archived = ? WHERE room_id = ?")
            .bind(archived)
            .bind(room_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Refresh the activity timestamp.
    pub async fn touch(&self, room_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE direct_conversations SET last_activity_at = ? WHERE room_id = ?")
            .bind(now_millis())
            .bind(room_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[tokio::test]
    async fn get_or_create_is_canonical_and_unique() {
        let db = test_db().await;
        let (conv, created) = db.directs().get_or_create(9, 4).await.unwrap();
        assert!(created);
        assert_eq!((conv.user1_id, conv.user2_id), (4, 9));

        // Same pair in either order resolves to the same room.
        let (again, created) = db.directs().get_or_create(4, 9).await.unwrap();
        assert!(!created);
        assert_eq!(again.room_id, conv.room_id);

        // Both memberships exist.
        assert!(db.memberships().active(conv.room_id, 4).await.unwrap().is_some());
        assert!(db.memberships().active(conv.room_id, 9).await.unwrap().is_some());

        // The backing room is a direct room with exactly two members.
        let room = db.rooms().fetch(conv.room_id).await.unwrap().unwrap();
        assert_eq!(room.room_type, crate::db::RoomType::Direct);
        assert_eq!(db.memberships().count_active(conv.room_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn self_conversation_rejected() {
        let db = test_db().await;
        let err = db.directs().get_or_create(4, 4).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn block_is_symmetric_in_effect_asymmetric_in_origin() {
        let db = test_db().await;
        let (conv, _) = db.directs().get_or_create(4, 9).await.unwrap();

        db.directs().block(conv.room_id, 9).await.unwrap();
        let blocked = db.directs().fetch_by_room(conv.room_id).await.unwrap().unwrap();
        assert!(blocked.blocked);
        assert_eq!(blocked.blocker_id, Some(9));

        // The non-blocker cannot lift it.
        assert!(db.directs().unblock(conv.room_id, 4).await.is_err());
        db.directs().unblock(conv.room_id, 9).await.unwrap();
        let lifted = db.directs().fetch_by_room(conv.room_id).await.unwrap().unwrap();
        assert!(!lifted.blocked);
    }

    #[tokio::test]
    async fn outsider_cannot_block() {
        let db = test_db().await;
        let (conv, _) = db.directs().get_or_create(4, 9).await.unwrap();
        assert!(db.directs().block(conv.room_id, 7).await.is_err());
    }
}
