//! Principal directory access.
//!
//! The identity service owns this data; the engine reads it (and in
//! deployments without a shared database, a sync job upserts it). Rows map
//! straight onto [`Principal`].

use sqlx::SqlitePool;

use super::{DbError, now_millis};
use crate::auth::{GlobalRole, Principal, PrincipalStatus};

type PrincipalRow = (i64, String, String, String, bool);

/// Repository over the principal directory.
pub struct PrincipalRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> PrincipalRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row((id, display_name, role, status, email_verified): PrincipalRow) -> Principal {
        Principal {
            id,
            display_name,
            role: GlobalRole::parse(&role).unwrap_or(GlobalRole::Guest),
            status: PrincipalStatus::parse(&status).unwrap_or(PrincipalStatus::Suspended),
            email_verified,
        }
    }

    /// Fetch one principal by id.
    pub async fn fetch(&self, id: i64) -> Result<Option<Principal>, DbError> {
        let row: Option<PrincipalRow> = sqlx::query_as(
            "SELECT id, display_name, role, status, email_verified FROM principals WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Upsert a directory row (sync job and test fixtures).
    pub async fn upsert(&self, principal: &Principal) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO principals (id, display_name, role, status, email_verified, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                status = excluded.status,
                email_verified = excluded.email_verified
            "#,
        )
        .bind(principal.id)
        .bind(&principal.display_name)
        .bind(principal.role.as_str())
        .bind(principal.status.as_str())
        .bind(principal.email_verified)
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Ids among `ids` whose directory row is no longer active.
    ///
    /// Drives the periodic status sweep that closes connections of
    /// suspended or banned principals.
    pub async fn inactive_among(&self, ids: &[i64]) -> Result<Vec<i64>, DbError> {
        let mut inactive = Vec::new();
        for chunk in ids.chunks(256) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT id FROM principals WHERE id IN ({placeholders}) AND status != 'active'"
            );
            let mut query = sqlx::query_scalar::<_, i64>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            inactive.extend(query.fetch_all(self.pool).await?);
        }
        Ok(inactive)
    }

    /// Token ids currently revoked (not yet past their expiry).
    pub async fn active_revocations(&self) -> Result<Vec<String>, DbError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT jti FROM revoked_tokens WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(now_millis())
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(jti,)| jti).collect())
    }

    /// Record a token revocation (admin surface and tests).
    pub async fn revoke_token(&self, jti: &str, expires_at: Option<i64>) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR REPLACE INTO revoked_tokens (jti, revoked_at, expires_at) VALUES (?, ?, ?)",
        )
        .bind(jti)
        .bind(now_millis())
        .bind(expires_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn sample(id: i64, status: PrincipalStatus) -> Principal {
        Principal {
            id,
            display_name: format!("user{id}"),
            role: GlobalRole::User,
            status,
            email_verified: true,
        }
    }

    #[tokio::test]
    async fn upsert_and_fetch_roundtrip() {
        let db = test_db().await;
        let p = sample(1, PrincipalStatus::Active);
        db.principals().upsert(&p).await.unwrap();

        let fetched = db.principals().fetch(1).await.unwrap().unwrap();
        assert_eq!(fetched.id, 1);
        assert_eq!(fetched.display_name, "user1");
        assert_eq!(fetched.role, GlobalRole::User);
        assert_eq!(fetched.status, PrincipalStatus::Active);
    }

    #[tokio::test]
    async fn fetch_missing_returns_none() {
        let db = test_db().await;
        assert!(db.principals().fetch(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_among_finds_suspended() {
        let db = test_db().await;
        db.principals()
            .upsert(&sample(1, PrincipalStatus::Active))
            .await
            .unwrap();
        db.principals()
            .upsert(&sample(2, PrincipalStatus::Suspended))
            .await
            .unwrap();

        let inactive = db.principals().inactive_among(&[1, 2, 3]).await.unwrap();
        assert_eq!(inactive, vec![2]);
    }

    #[tokio::test]
    async fn revocations_exclude_expired() {
        let db = test_db().await;
        let p = db.principals();
        p.revoke_token("live", None).await.unwrap();
        p.revoke_token("expired", Some(now_millis() - 1000)).await.unwrap();

        let active = p.active_revocations().await.unwrap();
        assert_eq!(active, vec!["live".to_string()]);
    }
}
