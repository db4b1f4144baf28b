//! Invitation storage.
//!
//! Codes admit principals into invite-only rooms. `uses <= max_uses` always
//! holds; acceptance increments the counter and creates the membership in
//! one transaction.

use rand::Rng;
use rand::distributions::Alphanumeric;
use sqlx::SqlitePool;

use super::{DbError, now_millis};
use crate::authz::RoomRole;

/// Invitation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Revoked,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
            InvitationStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => InvitationStatus::Pending,
            "accepted" => InvitationStatus::Accepted,
            "declined" => InvitationStatus::Declined,
            "expired" => InvitationStatus::Expired,
            "revoked" => InvitationStatus::Revoked,
            _ => return None,
        })
    }
}

/// An invitation row.
#[derive(Debug, Clone)]
pub struct InvitationRecord {
    pub id: i64,
    pub room_id: i64,
    /// Kept for audit surfaces.
    #[allow(dead_code)]
    pub inviter_id: i64,
    pub invitee_id: Option<i64>,
    pub code: String,
    pub uses: i64,
    pub max_uses: i64,
    pub expires_at: Option<i64>,
    pub status: InvitationStatus,
}

type InvitationRow = (
    i64,
    i64,
    i64,
    Option<i64>,
    String,
    i64,
    i64,
    Option<i64>,
    String,
);

const COLUMNS: &str = "id, room_id, inviter_id, invitee_id, code, uses, max_uses, expires_at, status";

fn from_row(row: InvitationRow) -> InvitationRecord {
    let (id, room_id, inviter_id, invitee_id, code, uses, max_uses, expires_at, status) = row;
    InvitationRecord {
        id,
        room_id,
        inviter_id,
        invitee_id,
        code,
        uses,
        max_uses,
        expires_at,
        status: InvitationStatus::parse(&status).unwrap_or(InvitationStatus::Expired),
    }
}

/// Generate a random invitation code.
fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Repository over invitations.
pub struct InvitationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> InvitationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an invitation; `invitee_id` of `None` makes it a shareable code.
    pub async fn create(
        &self,
        room_id: i64,
        inviter_id: i64,
        invitee_id: Option<i64>,
        max_uses: i64,
        ttl_millis: Option<i64>,
    ) -> Result<InvitationRecord, DbError> {
        let code = generate_code();
        let expires_at = ttl_millis.map(|ttl| now_millis() + ttl);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invitations (room_id, inviter_id, invitee_id, code, max_uses, expires_at, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            RETURNING id
            "#,
        )
        .bind(room_id)
        .bind(inviter_id)
        .bind(invitee_id)
        .bind(&code)
        .bind(max_uses)
        .bind(expires_at)
        .bind(now_millis())
        .fetch_one(self.pool)
        .await?;

        self.fetch_by_id(id).await?.ok_or(DbError::NotFound)
    }

    async fn fetch_by_id(&self, id: i64) -> Result<Option<InvitationRecord>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM invitations WHERE id = ?");
        let row: Option<InvitationRow> =
            sqlx::query_as(&sql).bind(id).fetch_optional(self.pool).await?;
        Ok(row.map(from_row))
    }

    /// Fetch by code, regardless of validity.
    pub async fn fetch_by_code(&self, code: &str) -> Result<Option<InvitationRecord>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM invitations WHERE code = ?");
        let row: Option<InvitationRow> = sqlx::query_as(&sql)
            .bind(code)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// A pending invitation targeting `principal_id` in `room_id`, if any.
    pub async fn pending_for(
        &self,
        room_id: i64,
        principal_id: i64,
    ) -> Result<Option<InvitationRecord>, DbError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM invitations WHERE room_id = ? AND invitee_id = ? AND status = 'pending' ORDER BY id DESC LIMIT 1"
        );
        let row: Option<InvitationRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(principal_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// Accept an invitation: validates it, increments `uses`, marks it
    /// accepted when exhausted or targeted, and creates the membership —
    /// all atomically.
    pub async fn accept(
        &self,
        invitation_id: i64,
        principal_id: i64,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {COLUMNS} FROM invitations WHERE id = ?");
        let row: Option<InvitationRow> = sqlx::query_as(&sql)
            .bind(invitation_id)
            .fetch_optional(&mut *tx)
            .await?;
        let inv = row.map(from_row).ok_or(DbError::NotFound)?;

        if inv.status != InvitationStatus::Pending {
            return Err(DbError::Conflict("invitation is no longer pending".into()));
        }
        if let Some(expires) = inv.expires_at {
            if now_millis() > expires {
                return Err(DbError::Conflict("invitation has expired".into()));
            }
        }
        if inv.uses >= inv.max_uses {
            return Err(DbError::Conflict("invitation is exhausted".into()));
        }
        if let Some(invitee) = inv.invitee_id {
            if invitee != principal_id {
                return Err(DbError::Conflict("invitation targets another principal".into()));
            }
        }

        let new_uses = inv.uses + 1;
        let new_status = if new_uses >= inv.max_uses || inv.invitee_id.is_some() {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Pending
        };
        sqlx::query("UPDATE invitations SET uses = ?, status = ? WHERE id = ?")
            .bind(new_uses)
            .bind(new_status.as_str())
            .bind(invitation_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO memberships (room_id, principal_id, role, can_write, joined_at) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(inv.room_id)
        .bind(principal_id)
        .bind(RoomRole::Member.as_str())
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE rooms SET member_count = member_count + 1, updated_at = ? WHERE id = ?")
            .bind(now_millis())
            .bind(inv.room_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Decline a targeted invitation.
    #[allow(dead_code)] // Part of the invitation lifecycle contract
    pub async fn decline(&self, invitation_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE invitations SET status = 'declined' WHERE id = ? AND status = 'pending'")
            .bind(invitation_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Revoke an invitation by code.
    pub async fn revoke(&self, room_id: i64, code: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'revoked' WHERE room_id = ? AND code = ? AND status = 'pending'",
        )
        .bind(room_id)
        .bind(code)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark past-deadline pending invitations expired.
    pub async fn expire_stale(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "UPDATE invitations SET status = 'expired' WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now_millis())
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
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
                slug: Some("club"),
                name: "club",
                room_type: RoomType::Private,
                privacy: Privacy::InviteOnly,
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
    async fn accept_creates_membership_atomically() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let inv = db
            .invitations()
            .create(room_id, 1, None, 2, None)
            .await
            .unwrap();

        db.invitations().accept(inv.id, 5).await.unwrap();
        assert!(db.memberships().active(room_id, 5).await.unwrap().is_some());

        // Two uses allowed; still pending after one.
        let after = db.invitations().fetch_by_code(&inv.code).await.unwrap().unwrap();
        assert_eq!(after.uses, 1);
        assert_eq!(after.status, InvitationStatus::Pending);

        db.invitations().accept(inv.id, 6).await.unwrap();
        let spent = db.invitations().fetch_by_code(&inv.code).await.unwrap().unwrap();
        assert_eq!(spent.status, InvitationStatus::Accepted);

        // Exhausted now.
        let err = db.invitations().accept(inv.id, 7).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn expired_invitation_rejected() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let inv = db
            .invitations()
            .create(room_id, 1, None, 1, Some(-1000))
            .await
            .unwrap();
        let err = db.invitations().accept(inv.id, 5).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        assert_eq!(db.invitations().expire_stale().await.unwrap(), 1);
        let after = db.invitations().fetch_by_code(&inv.code).await.unwrap().unwrap();
        assert_eq!(after.status, InvitationStatus::Expired);
    }

    #[tokio::test]
    async fn targeted_invitation_rejects_other_principals() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let inv = db
            .invitations()
            .create(room_id, 1, Some(5), 1, None)
            .await
            .unwrap();

        let err = db.invitations().accept(inv.id, 6).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        db.invitations().accept(inv.id, 5).await.unwrap();
    }

    #[tokio::test]
    async fn revoked_invitation_cannot_admit() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let inv = db
            .invitations()
            .create(room_id, 1, None, 5, None)
            .await
            .unwrap();
        assert!(db.invitations().revoke(room_id, &inv.code).await.unwrap());
        let err = db.invitations().accept(inv.id, 5).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn pending_for_finds_targeted_invitation() {
        let db = test_db().await;
        let room_id = room(&db).await;
        db.invitations()
            .create(room_id, 1, Some(5), 1, None)
            .await
            .unwrap();
        assert!(db.invitations().pending_for(room_id, 5).await.unwrap().is_some());
        assert!(db.invitations().pending_for(room_id, 6).await.unwrap().is_none());
    }
}
