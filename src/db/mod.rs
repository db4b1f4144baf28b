//! Database module for persistent storage.
//!
//! Async SQLite access via SQLx. All writes go to the primary pool; reads
//! may be served by an optional replica pool (history and statistics
//! traffic prefers it). Repositories borrow a pool and expose typed
//! operations; transient failures are retried with bounded exponential
//! backoff before surfacing `unavailable`.

mod cache;
mod directs;
mod invitations;
mod memberships;
mod messages;
mod moderation_log;
mod principals;
mod reactions;
mod rooms;

pub use cache::CacheStore;
pub use directs::{DirectConversation, DirectRepository};
pub use invitations::{InvitationRecord, InvitationRepository, InvitationStatus};
pub use memberships::{MembershipRecord, MembershipRepository};
pub use messages::{
    HistoryPage, MessageRecord, MessageRepository, MessageStatus, NewMessage, RoomStats,
};
pub use moderation_log::{ModerationEntry, ModerationLogRepository};
pub use principals::PrincipalRepository;
pub use reactions::ReactionRepository;
pub use rooms::{NewRoom, Privacy, RoomRecord, RoomRepository, RoomStatus, RoomType};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("storage unavailable")]
    Unavailable,
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::Unavailable
            }
            sqlx::Error::Database(db) => {
                let msg = db.message().to_string();
                if msg.contains("UNIQUE constraint failed") {
                    DbError::Conflict(msg)
                } else if msg.contains("constraint failed") {
                    DbError::ConstraintViolation(msg)
                } else if msg.contains("database is locked") {
                    DbError::Unavailable
                } else {
                    DbError::Sqlx(sqlx::Error::Database(db))
                }
            }
            other => DbError::Sqlx(other),
        }
    }
}

impl DbError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Unavailable)
    }
}

/// Retry policy for transient persistence failures: 3 attempts, exponential
/// backoff from 100ms, 5-second deadline per attempt.
pub async fn with_retry<T, F, Fut>(op: F) -> Result<T, DbError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, DbError>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    const BASE_BACKOFF: Duration = Duration::from_millis(100);
    const ATTEMPT_DEADLINE: Duration = Duration::from_secs(5);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(ATTEMPT_DEADLINE, op()).await {
            Ok(r) => r,
            Err(_) => Err(DbError::Unavailable),
        };

        match result {
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, "transient persistence failure, retrying");
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}

/// Database handle with primary and optional replica pools.
#[derive(Clone)]
pub struct Database {
    primary: SqlitePool,
    replica: Option<SqlitePool>,
}

impl Database {
    /// Pool acquire timeout - prevents connection storms from blocking
    /// indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open a pool for the given URL or path.
    async fn open_pool(url: &str, pool_size: u32) -> Result<SqlitePool, DbError> {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);

        let pool = if path == ":memory:" {
            // Shared-cache in-memory mode so the pool sees one database.
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(pool_size)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(DbError::from)?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(pool_size)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await
                .map_err(DbError::from)?
        };

        Ok(pool)
    }

    /// Connect the primary (and optional replica) pools, running migrations
    /// on the primary.
    pub async fn new(
        url: &str,
        replica_url: Option<&str>,
        pool_size: u32,
    ) -> Result<Self, DbError> {
        let primary = Self::open_pool(url, pool_size).await?;
        info!(url = %url, "database connected (primary)");

        Self::run_migrations(&primary).await?;

        let replica = match replica_url {
            Some(r) => {
                let pool = Self::open_pool(r, pool_size).await?;
                info!(url = %r, "database connected (replica)");
                Some(pool)
            }
            None => None,
        };

        Ok(Self { primary, replica })
    }

    /// The primary pool; all writes go here.
    pub fn pool(&self) -> &SqlitePool {
        &self.primary
    }

    /// Pool for read traffic: the replica when configured, else the primary.
    pub fn reader(&self) -> &SqlitePool {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Cheap liveness probe against the primary, for the readiness endpoint.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.primary)
            .await
            .is_ok()
    }

    /// Run embedded migrations.
    /// Checks for a sentinel table and applies the full schema when missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        let core_tables = [
            "principals",
            "rooms",
            "memberships",
            "messages",
            "reactions",
            "invitations",
            "moderation_log",
            "direct_conversations",
        ];
        let mut core_ok = true;
        for t in core_tables {
            if !table_exists(pool, t).await {
                core_ok = false;
                break;
            }
        }

        if core_ok {
            info!("database already initialized");
        } else {
            Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
            info!("database migrations applied (001_init)");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        let uncommented: String = migration
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");

        for statement in uncommented.split(';') {
            let sql = statement.trim();

            if sql.is_empty() {
                continue;
            }

            if let Err(e) = sqlx::query(sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "migration statement failed");
                }
            }
        }
    }

    /// Principal directory repository.
    pub fn principals(&self) -> PrincipalRepository<'_> {
        PrincipalRepository::new(&self.primary)
    }

    /// Room repository.
    pub fn rooms(&self) -> RoomRepository<'_> {
        RoomRepository::new(&self.primary)
    }

    /// Membership repository.
    pub fn memberships(&self) -> MembershipRepository<'_> {
        MembershipRepository::new(&self.primary)
    }

    /// Message repository (writes on the primary).
    pub fn messages(&self) -> MessageRepository<'_> {
        MessageRepository::new(&self.primary)
    }

    /// Message repository bound to the read pool (history, search, stats).
    pub fn messages_read(&self) -> MessageRepository<'_> {
        MessageRepository::new(self.reader())
    }

    /// Reaction repository.
    pub fn reactions(&self) -> ReactionRepository<'_> {
        ReactionRepository::new(&self.primary)
    }

    /// Invitation repository.
    pub fn invitations(&self) -> InvitationRepository<'_> {
        InvitationRepository::new(&self.primary)
    }

    /// Moderation log repository.
    pub fn moderation(&self) -> ModerationLogRepository<'_> {
        ModerationLogRepository::new(&self.primary)
    }

    /// Direct-conversation repository.
    pub fn directs(&self) -> DirectRepository<'_> {
        DirectRepository::new(&self.primary)
    }
}

/// Current time as unix epoch milliseconds; the timestamp format used across
/// the schema.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unit-test database: a unique temp file per call so parallel tests stay
/// isolated (shared-cache `:memory:` is one database per process).
#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let path = std::env::temp_dir().join(format!(
        "palaverd-unit-{}-{}.db",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    Database::new(path.to_str().expect("utf-8 temp path"), None, 2)
        .await
        .expect("test database")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_apply_and_ping_succeeds() {
        let db = test_db().await;
        assert!(db.ping().await);
    }

    #[tokio::test]
    async fn retry_gives_up_after_three_attempts() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);

        let result: Result<(), DbError> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::Unavailable) }
        })
        .await;

        assert!(matches!(result, Err(DbError::Unavailable)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_passes_through_non_transient_errors() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);

        let result: Result<(), DbError> = with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::NotFound) }
        })
        .await;

        assert!(matches!(result, Err(DbError::NotFound)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
