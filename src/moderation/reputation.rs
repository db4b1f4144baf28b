//! Reputation tracking and the low-reputation gate.
//!
//! Scores live in the `reputation` table, cached in memory. The gate cannot
//! await, so scores are preloaded when a principal connects and updated as
//! violations are recorded; an unknown principal scores neutral.

use dashmap::DashMap;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use super::{ContentCtx, ContentFilter, Decision};

/// Reputation score store with write-through cache.
pub struct ReputationStore {
    pool: SqlitePool,
    scores: DashMap<i64, i32>,
}

impl ReputationStore {
    /// Create the store over the primary pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            scores: DashMap::new(),
        }
    }

    /// Cached score; 0 (neutral) when the principal has no record loaded.
    pub fn score(&self, principal_id: i64) -> i32 {
        self.scores.get(&principal_id).map(|s| *s).unwrap_or(0)
    }

    /// Load a principal's score into the cache (called at connect time).
    pub async fn preload(&self, principal_id: i64) {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT score FROM reputation WHERE principal_id = ?")
                .bind(principal_id)
                .fetch_optional(&self.pool)
                .await
                .unwrap_or(None);
        self.scores.insert(principal_id, row.map(|(s,)| s).unwrap_or(0));
    }

    /// Penalize a principal after a moderation violation.
    pub async fn record_violation(&self, principal_id: i64, penalty: i32) {
        let new_score = self.score(principal_id) - penalty;
        self.scores.insert(principal_id, new_score);

        let result = sqlx::query(
            r#"
            INSERT INTO reputation (principal_id, score, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(principal_id) DO UPDATE
            SET score = excluded.score, updated_at = excluded.updated_at
            "#,
        )
        .bind(principal_id)
        .bind(new_score)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(principal = principal_id, error = %e, "failed to persist reputation");
        } else {
            debug!(principal = principal_id, score = new_score, "reputation penalized");
        }
    }

    /// Reward sustained good behavior (e.g. clean session close).
    pub async fn record_good_standing(&self, principal_id: i64, bonus: i32) {
        let new_score = (self.score(principal_id) + bonus).min(100);
        self.scores.insert(principal_id, new_score);

        let _ = sqlx::query(
            r#"
            INSERT INTO reputation (principal_id, score, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(principal_id) DO UPDATE
            SET score = excluded.score, updated_at = excluded.updated_at
            "#,
        )
        .bind(principal_id)
        .bind(new_score)
        .execute(&self.pool)
        .await;
    }

    /// Drop the cached score (on disconnect) to bound memory.
    pub fn forget(&self, principal_id: i64) {
        self.scores.remove(&principal_id);
    }

    /// Test hook: seed a score without touching the database.
    #[cfg(test)]
    pub fn seed(&self, principal_id: i64, score: i32) {
        self.scores.insert(principal_id, score);
    }
}

/// Gate applying stricter rules to low-reputation principals.
pub struct ReputationGate {
    store: Arc<ReputationStore>,
    threshold: i32,
}

impl ReputationGate {
    /// Create the gate with the configured threshold.
    pub fn new(store: Arc<ReputationStore>, threshold: i32) -> Self {
        Self { store, threshold }
    }
}

impl ContentFilter for ReputationGate {
    fn name(&self) -> &'static str {
        "reputation"
    }

    fn inspect(&self, ctx: &ContentCtx<'_>) -> Decision {
        let score = self.store.score(ctx.principal_id);
        if score >= self.threshold {
            return Decision::Allow;
        }

        // Below threshold: links are blocked outright, everything else is
        // flagged for review.
        let has_link = ctx
            .content
            .split_whitespace()
            .any(|w| w.starts_with("http://") || w.starts_with("https://"));
        if has_link {
            Decision::Block("low-reputation sender posting links".into())
        } else {
            Decision::Flag("low-reputation sender".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_proto::MessageKind;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE reputation (
                principal_id INTEGER PRIMARY KEY,
                score INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn ctx(principal_id: i64, content: &str) -> ContentCtx<'_> {
        ContentCtx {
            principal_id,
            room_id: 1,
            content,
            kind: MessageKind::Text,
        }
    }

    #[tokio::test]
    async fn neutral_score_passes() {
        let store = Arc::new(ReputationStore::new(memory_pool().await));
        let gate = ReputationGate::new(store, -50);
        assert_eq!(gate.inspect(&ctx(1, "hello")), Decision::Allow);
    }

    #[tokio::test]
    async fn low_reputation_flags_text_blocks_links() {
        let store = Arc::new(ReputationStore::new(memory_pool().await));
        store.seed(2, -80);
        let gate = ReputationGate::new(Arc::clone(&store), -50);

        assert!(matches!(gate.inspect(&ctx(2, "plain text")), Decision::Flag(_)));
        assert!(matches!(
            gate.inspect(&ctx(2, "see https://sketchy.example")),
            Decision::Block(_)
        ));
    }

    #[tokio::test]
    async fn violations_persist_and_reload() {
        let pool = memory_pool().await;
        let store = ReputationStore::new(pool.clone());
        store.record_violation(3, 20).await;
        store.record_violation(3, 20).await;
        assert_eq!(store.score(3), -40);

        // A fresh store sees the persisted score after preload.
        let fresh = ReputationStore::new(pool);
        assert_eq!(fresh.score(3), 0);
        fresh.preload(3).await;
        assert_eq!(fresh.score(3), -40);
    }
}
