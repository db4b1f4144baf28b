//! Reaction storage: (message, principal, emoji) triples.

use sqlx::SqlitePool;

use super::{DbError, now_millis};

/// Repository over reactions.
pub struct ReactionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReactionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Add a reaction. Idempotent: re-adding the same triple stores one row.
    /// Returns whether a row was actually inserted.
    pub async fn add(
        &self,
        message_id: i64,
        principal_id: i64,
        emoji: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO reactions (message_id, principal_id, emoji, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(principal_id)
        .bind(emoji)
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a reaction. Returns whether a row existed.
    pub async fn remove(
        &self,
        message_id: i64,
        principal_id: i64,
        emoji: &str,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM reactions WHERE message_id = ? AND principal_id = ? AND emoji = ?",
        )
        .bind(message_id)
        .bind(principal_id)
        .bind(emoji)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Per-emoji counts for one message.
    #[allow(dead_code)] // Served with message detail views
    pub async fn counts(&self, message_id: i64) -> Result<Vec<(String, i64)>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT emoji, COUNT(*) FROM reactions WHERE message_id = ? GROUP BY emoji ORDER BY COUNT(*) DESC",
        )
        .bind(message_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }
}
