//! Cache-tier store for best-effort snapshots.
//!
//! Holds state that is nice to carry across a restart but safe to lose:
//! rate-limit windows and presence. Backed by its own store when a cache
//! URL is configured, otherwise by the primary database.

use sqlx::SqlitePool;

use super::{DbError, now_millis};
use crate::limits::QuotaSnapshot;

/// Snapshot store on the cache tier.
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Wrap a pool (the cache pool, or the primary as fallback).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist the current rate-limit window. Best-effort: failures log and
    /// move on.
    pub async fn save_quota_window(&self, rows: &[QuotaSnapshot]) {
        let now = now_millis();
        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO rate_quota_snapshot (principal_id, sent, premium, window_start)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(principal_id) DO UPDATE
                SET sent = excluded.sent, premium = excluded.premium, window_start = excluded.window_start
                "#,
            )
            .bind(row.principal_id)
            .bind(row.sent as i64)
            .bind(row.premium)
            .bind(now)
            .execute(&self.pool)
            .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to snapshot rate quota");
                return;
            }
        }
    }

    /// Load quota rows recent enough to still matter (within `window_ms`).
    pub async fn load_recent_quota(&self, window_ms: i64) -> Result<Vec<QuotaSnapshot>, DbError> {
        let cutoff = now_millis() - window_ms;
        let rows: Vec<(i64, i64, bool)> = sqlx::query_as(
            "SELECT principal_id, sent, premium FROM rate_quota_snapshot WHERE window_start > ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(principal_id, sent, premium)| QuotaSnapshot {
                principal_id,
                sent: sent.max(0) as u32,
                premium,
            })
            .collect())
    }

    /// Persist the set of online principals. Best-effort.
    pub async fn save_presence(&self, online: &[i64]) {
        let now = now_millis();
        if let Err(e) = sqlx::query("DELETE FROM presence_snapshot").execute(&self.pool).await {
            tracing::warn!(error = %e, "failed to clear presence snapshot");
            return;
        }
        for id in online {
            let result = sqlx::query(
                "INSERT OR REPLACE INTO presence_snapshot (principal_id, online_at) VALUES (?, ?)",
            )
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to snapshot presence");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[tokio::test]
    async fn quota_snapshot_roundtrip() {
        let db = test_db().await;
        let store = CacheStore::new(db.pool().clone());
        let rows = vec![
            QuotaSnapshot {
                principal_id: 1,
                sent: 12,
                premium: false,
            },
            QuotaSnapshot {
                principal_id: 2,
                sent: 3,
                premium: true,
            },
        ];
        store.save_quota_window(&rows).await;

        let mut loaded = store.load_recent_quota(60_000).await.unwrap();
        loaded.sort_by_key(|r| r.principal_id);
        assert_eq!(loaded, rows);

        // Rows outside the recency window are ignored.
        assert!(store.load_recent_quota(-1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presence_snapshot_overwrites() {
        let db = test_db().await;
        let store = CacheStore::new(db.pool().clone());
        store.save_presence(&[1, 2, 3]).await;
        store.save_presence(&[2]).await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM presence_snapshot")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
