//! Moderation audit log and review queue.
//!
//! The log is append-only and never deleted; it backs appeals and metrics.
//! The review queue collects flagged messages for moderator attention.

use sqlx::SqlitePool;

use super::{DbError, now_millis};

/// One audit entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModerationEntry {
    pub id: i64,
    pub action: String,
    pub actor_id: Option<i64>,
    pub target_id: Option<i64>,
    pub room_id: Option<i64>,
    pub reason: Option<String>,
    pub duration_secs: Option<i64>,
    pub created_at: i64,
}

/// Repository over the moderation log and review queue.
pub struct ModerationLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ModerationLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an audit entry.
    pub async fn append(
        &self,
        action: &str,
        actor_id: Option<i64>,
        target_id: Option<i64>,
        room_id: Option<i64>,
        reason: Option<&str>,
        duration_secs: Option<i64>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_log (action, actor_id, target_id, room_id, reason, duration_secs, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action)
        .bind(actor_id)
        .bind(target_id)
        .bind(room_id)
        .bind(reason)
        .bind(duration_secs)
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Recent entries for one room, newest first.
    #[allow(dead_code)] // Serves appeal/audit tooling
    pub async fn list_for_room(
        &self,
        room_id: i64,
        limit: u32,
    ) -> Result<Vec<ModerationEntry>, DbError> {
        let rows: Vec<(i64, String, Option<i64>, Option<i64>, Option<i64>, Option<String>, Option<i64>, i64)> =
            sqlx::query_as(
                r#"
                SELECT id, action, actor_id, target_id, room_id, reason, duration_secs, created_at
                FROM moderation_log WHERE room_id = ? ORDER BY created_at DESC LIMIT ?
                "#,
            )
            .bind(room_id)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, action, actor_id, target_id, room_id, reason, duration_secs, created_at)| {
                    ModerationEntry {
                        id,
                        action,
                        actor_id,
                        target_id,
                        room_id,
                        reason,
                        duration_secs,
                        created_at,
                    }
                },
            )
            .collect())
    }

    /// Enqueue a flagged message for review.
    pub async fn enqueue_review(
        &self,
        message_id: i64,
        room_id: i64,
        reason: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO moderation_review (message_id, room_id, reason, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(room_id)
        .bind(reason)
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Open review items (oldest first), as (review id, message id, room id, reason).
    #[allow(dead_code)] // Consumed by moderator tooling
    pub async fn open_reviews(
        &self,
        limit: u32,
    ) -> Result<Vec<(i64, i64, i64, String)>, DbError> {
        let rows: Vec<(i64, i64, i64, String)> = sqlx::query_as(
            "SELECT id, message_id, room_id, reason FROM moderation_review WHERE resolved = 0 ORDER BY id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Resolve a review item.
    #[allow(dead_code)] // Consumed by moderator tooling
    pub async fn resolve_review(&self, review_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE moderation_review SET resolved = 1 WHERE id = ?")
            .bind(review_id)
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
    async fn append_and_list() {
        let db = test_db().await;
        let log = db.moderation();
        log.append("kick", Some(1), Some(2), Some(7), Some("spam"), None)
            .await
            .unwrap();
        log.append("mute", Some(1), Some(3), Some(7), None, Some(600))
            .await
            .unwrap();
        log.append("ban", Some(1), Some(4), Some(8), None, None)
            .await
            .unwrap();

        let entries = log.list_for_room(7, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.action == "kick"));
        assert!(entries.iter().any(|e| e.duration_secs == Some(600)));
    }

    #[tokio::test]
    async fn review_queue_lifecycle() {
        let db = test_db().await;
        let log = db.moderation();
        log.enqueue_review(42, 7, "profanity pattern").await.unwrap();

        let open = log.open_reviews(10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].1, 42);

        log.resolve_review(open[0].0).await.unwrap();
        assert!(log.open_reviews(10).await.unwrap().is_empty());
    }
}
