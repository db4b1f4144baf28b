//! Message storage.
//!
//! A message insert and its per-room id allocation happen in one
//! transaction: the room row carries the sequence counter, so the write is
//! atomic and `room_seq` is strictly increasing per room. Creation
//! timestamps are clamped to never run backwards within a room, keeping
//! `seq` order and `created_at` order consistent.

use palaver_proto::{Attachment, MessageKind};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{DbError, now_millis};

/// Message delivery/lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Edited,
    Deleted,
    Flagged,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Edited => "edited",
            MessageStatus::Deleted => "deleted",
            MessageStatus::Flagged => "flagged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "edited" => MessageStatus::Edited,
            "deleted" => MessageStatus::Deleted,
            "flagged" => MessageStatus::Flagged,
            _ => return None,
        })
    }
}

/// A message row.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Globally-unique surrogate id.
    pub id: i64,
    /// External addressing id.
    pub uuid: String,
    pub room_id: i64,
    /// Per-room monotonic id.
    pub room_seq: i64,
    /// `None` for system messages.
    pub author_id: Option<i64>,
    pub author_name: String,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to: Option<i64>,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<i64>,
    pub status: MessageStatus,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    pub moderator_id: Option<i64>,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl MessageRecord {
    /// Whether the author may still edit: within 15 minutes of creation.
    pub fn within_edit_window(&self, now: i64) -> bool {
        const EDIT_WINDOW_MS: i64 = 15 * 60 * 1000;
        now - self.created_at <= EDIT_WINDOW_MS
    }
}

/// Parameters for persisting a new message.
pub struct NewMessage<'a> {
    pub room_id: i64,
    /// `None` makes it a system message.
    pub author: Option<(i64, &'a str)>,
    pub kind: MessageKind,
    pub content: &'a str,
    pub reply_to: Option<i64>,
    pub attachments: &'a [Attachment],
    pub mentions: &'a [i64],
    pub flagged: bool,
    pub flag_reason: Option<&'a str>,
}

/// One page of history plus the cursor for the next one.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<MessageRecord>,
    /// `before` cursor for the next (older) page, when more exist.
    pub next_before: Option<i64>,
}

/// Aggregate statistics for one room.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomStats {
    pub room_id: i64,
    pub message_count: i64,
    pub member_count: i64,
    pub messages_last_day: i64,
    pub distinct_authors: i64,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    uuid: String,
    room_id: i64,
    room_seq: i64,
    author_id: Option<i64>,
    author_name: String,
    kind: String,
    content: String,
    reply_to: Option<i64>,
    attachments: Option<String>,
    mentions: Option<String>,
    status: String,
    flagged: bool,
    flag_reason: Option<String>,
    moderator_id: Option<i64>,
    created_at: i64,
    edited_at: Option<i64>,
    deleted_at: Option<i64>,
}

const COLUMNS: &str = "id, uuid, room_id, room_seq, author_id, author_name, kind, content, \
     reply_to, attachments, mentions, status, flagged, flag_reason, moderator_id, \
     created_at, edited_at, deleted_at";

fn from_row(row: MessageRow) -> MessageRecord {
    let MessageRow {
        id,
        uuid,
        room_id,
        room_seq,
        author_id,
        author_name,
        kind,
        content,
        reply_to,
        attachments,
        mentions,
        status,
        flagged,
        flag_reason,
        moderator_id,
        created_at,
        edited_at,
        deleted_at,
    } = row;
    MessageRecord {
        id,
        uuid,
        room_id,
        room_seq,
        author_id,
        author_name,
        kind: MessageKind::parse(&kind).unwrap_or(MessageKind::Text),
        content,
        reply_to,
        attachments: attachments
            .and_then(|a| serde_json::from_str(&a).ok())
            .unwrap_or_default(),
        mentions: mentions
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_default(),
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Sent),
        flagged,
        flag_reason,
        moderator_id,
        created_at,
        edited_at,
        deleted_at,
    }
}

/// Repository over messages.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message, allocating the next per-room id atomically.
    ///
    /// Also bumps the room's counters, refreshes its activity timestamp, and
    /// re-activates an inactive room (first message flips it back).
    pub async fn insert(&self, msg: NewMessage<'_>) -> Result<MessageRecord, DbError> {
        let mut tx = self.pool.begin().await?;

        let now = now_millis();
        let seq: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE rooms
            SET last_message_id = last_message_id + 1,
                message_count = message_count + 1,
                last_activity_at = ?,
                status = CASE WHEN status = 'inactive' THEN 'active' ELSE status END,
                updated_at = ?
            WHERE id = ?
            RETURNING last_message_id
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(msg.room_id)
        .fetch_optional(&mut *tx)
        .await?;
        let seq = seq.ok_or(DbError::NotFound)?;

        // Clamp against the previous message so created_at never decreases
        // within a room even under clock adjustment.
        let prev_created: Option<i64> = sqlx::query_scalar(
            "SELECT created_at FROM messages WHERE room_id = ? ORDER BY room_seq DESC LIMIT 1",
        )
        .bind(msg.room_id)
        .fetch_optional(&mut *tx)
        .await?;
        let created_at = prev_created.map_or(now, |prev| now.max(prev));

        let uuid = Uuid::new_v4().to_string();
        let attachments = if msg.attachments.is_empty() {
            None
        } else {
            Some(serde_json::to_string(msg.attachments).unwrap_or_default())
        };
        let mentions = if msg.mentions.is_empty() {
            None
        } else {
            Some(serde_json::to_string(msg.mentions).unwrap_or_default())
        };
        let status = if msg.flagged {
            MessageStatus::Flagged
        } else {
            MessageStatus::Sent
        };

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (uuid, room_id, room_seq, author_id, author_name, kind, content,
                                  reply_to, attachments, mentions, status, flagged, flag_reason,
                                  created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&uuid)
        .bind(msg.room_id)
        .bind(seq)
        .bind(msg.author.map(|(id, _)| id))
        .bind(msg.author.map(|(_, name)| name).unwrap_or(""))
        .bind(msg.kind.as_str())
        .bind(msg.content)
        .bind(msg.reply_to)
        .bind(&attachments)
        .bind(&mentions)
        .bind(status.as_str())
        .bind(msg.flagged)
        .bind(msg.flag_reason)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MessageRecord {
            id,
            uuid,
            room_id: msg.room_id,
            room_seq: seq,
            author_id: msg.author.map(|(id, _)| id),
            author_name: msg.author.map(|(_, n)| n.to_string()).unwrap_or_default(),
            kind: msg.kind,
            content: msg.content.to_string(),
            reply_to: msg.reply_to,
            attachments: msg.attachments.to_vec(),
            mentions: msg.mentions.to_vec(),
            status,
            flagged: msg.flagged,
            flag_reason: msg.flag_reason.map(str::to_string),
            moderator_id: None,
            created_at,
            edited_at: None,
            deleted_at: None,
        })
    }

    /// Fetch one message by its per-room id.
    pub async fn fetch(
        &self,
        room_id: i64,
        room_seq: i64,
    ) -> Result<Option<MessageRecord>, DbError> {
        let sql = format!("SELECT {COLUMNS} FROM messages WHERE room_id = ? AND room_seq = ?");
        let row: Option<MessageRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(room_seq)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    /// Apply an edit: new content, `edited` status, timestamp.
    pub async fn apply_edit(
        &self,
        room_id: i64,
        room_seq: i64,
        content: &str,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE messages SET content = ?, status = 'edited', edited_at = ? WHERE room_id = ? AND room_seq = ? AND deleted_at IS NULL",
        )
        .bind(content)
        .bind(now_millis())
        .bind(room_id)
        .bind(room_seq)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Soft-delete: the row keeps its id and timestamps; content is served
    /// redacted to everyone but the author and moderators.
    pub async fn soft_delete(
        &self,
        room_id: i64,
        room_seq: i64,
        moderator_id: Option<i64>,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'deleted', deleted_at = ?, moderator_id = ? WHERE room_id = ? AND room_seq = ? AND deleted_at IS NULL",
        )
        .bind(now_millis())
        .bind(moderator_id)
        .bind(room_id)
        .bind(room_seq)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Paginated history: newest-first descending by per-room id.
    ///
    /// `before` returns messages with `room_seq < before`; `after` returns
    /// `room_seq > after` in ascending order. Flagged messages are excluded
    /// unless `include_flagged` (moderator view).
    pub async fn history(
        &self,
        room_id: i64,
        before: Option<i64>,
        after: Option<i64>,
        limit: u32,
        include_flagged: bool,
    ) -> Result<HistoryPage, DbError> {
        let flag_clause = if include_flagged { "" } else { "AND flagged = 0" };

        let messages: Vec<MessageRecord> = if let Some(after) = after {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE room_id = ? AND room_seq > ? {flag_clause} ORDER BY room_seq ASC LIMIT ?"
            );
            let rows: Vec<MessageRow> = sqlx::query_as(&sql)
                .bind(room_id)
                .bind(after)
                .bind(limit as i64)
                .fetch_all(self.pool)
                .await?;
            rows.into_iter().map(from_row).collect()
        } else {
            let before = before.unwrap_or(i64::MAX);
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE room_id = ? AND room_seq < ? {flag_clause} ORDER BY room_seq DESC LIMIT ?"
            );
            let rows: Vec<MessageRow> = sqlx::query_as(&sql)
                .bind(room_id)
                .bind(before)
                .bind(limit as i64)
                .fetch_all(self.pool)
                .await?;
            rows.into_iter().map(from_row).collect()
        };

        let next_before = if after.is_none() && messages.len() == limit as usize {
            messages.last().map(|m| m.room_seq)
        } else {
            None
        };

        Ok(HistoryPage {
            messages,
            next_before,
        })
    }

    /// Substring search within a room, newest first. Deleted and flagged
    /// messages never match.
    pub async fn search(
        &self,
        room_id: i64,
        needle: &str,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, DbError> {
        let escaped = needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM messages
            WHERE room_id = ? AND content LIKE ? ESCAPE '\'
              AND status != 'deleted' AND flagged = 0
            ORDER BY room_seq DESC LIMIT ?
            "#
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(&pattern)
            .bind(limit as i64)
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    /// Per-room aggregate statistics.
    pub async fn room_stats(&self, room_id: i64) -> Result<RoomStats, DbError> {
        let (message_count, member_count): (i64, i64) = sqlx::query_as(
            "SELECT message_count, member_count FROM rooms WHERE id = ?",
        )
        .bind(room_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(DbError::NotFound)?;

        let day_ago = now_millis() - 86_400_000;
        let messages_last_day: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE room_id = ? AND created_at > ?",
        )
        .bind(room_id)
        .bind(day_ago)
        .fetch_one(self.pool)
        .await?;

        let distinct_authors: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT author_id) FROM messages WHERE room_id = ? AND author_id IS NOT NULL",
        )
        .bind(room_id)
        .fetch_one(self.pool)
        .await?;

        Ok(RoomStats {
            room_id,
            message_count,
            member_count,
            messages_last_day,
            distinct_authors,
        })
    }

    /// Global counters: (total messages, total rooms, active rooms).
    pub async fn global_stats(&self) -> Result<(i64, i64, i64), DbError> {
        let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(self.pool)
            .await?;
        let rooms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rooms")
            .fetch_one(self.pool)
            .await?;
        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rooms WHERE status = 'active'")
                .fetch_one(self.pool)
                .await?;
        Ok((messages, rooms, active))
    }

    /// Messages sent by one principal.
    pub async fn principal_message_count(&self, principal_id: i64) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE author_id = ?")
                .bind(principal_id)
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }

    /// Day-bucketed message counts for a room, most recent day first.
    /// Returns (day_start_millis, count) pairs.
    pub async fn daily_series(
        &self,
        room_id: i64,
        days: u32,
    ) -> Result<Vec<(i64, i64)>, DbError> {
        let cutoff = now_millis() - (days as i64) * 86_400_000;
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT (created_at / 86400000) * 86400000 AS day, COUNT(*)
            FROM messages
            WHERE room_id = ? AND created_at > ?
            GROUP BY day
            ORDER BY day DESC
            "#,
        )
        .bind(room_id)
        .bind(cutoff)
        .fetch_all(self.pool)
        .await?;
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

    fn text<'a>(room_id: i64, author: i64, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            room_id,
            author: Some((author, "alice")),
            kind: MessageKind::Text,
            content,
            reply_to: None,
            attachments: &[],
            mentions: &[],
            flagged: false,
            flag_reason: None,
        }
    }

    #[tokio::test]
    async fn seq_is_monotonic_and_created_at_nondecreasing() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();

        let mut prev_seq = 0;
        let mut prev_created = 0;
        for i in 0..5 {
            let content = format!("msg {i}");
            let msg = repo.insert(text(room_id, 1, &content)).await.unwrap();
            assert!(msg.room_seq > prev_seq);
            assert!(msg.created_at >= prev_created);
            prev_seq = msg.room_seq;
            prev_created = msg.created_at;
        }
        assert_eq!(prev_seq, 5);
    }

    #[tokio::test]
    async fn persist_then_fetch_is_identical() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let inserted = db
            .messages()
            .insert(text(room_id, 1, "hello there"))
            .await
            .unwrap();

        let fetched = db
            .messages()
            .fetch(room_id, inserted.room_seq)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.content, "hello there");
        assert_eq!(fetched.created_at, inserted.created_at);
        assert_eq!(fetched.uuid, inserted.uuid);
        assert_eq!(fetched.status, MessageStatus::Sent);
        assert_eq!(fetched.author_id, Some(1));
    }

    #[tokio::test]
    async fn insert_into_unknown_room_is_not_found() {
        let db = test_db().await;
        let err = db.messages().insert(text(999, 1, "hi")).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn history_pagination_descends_with_cursor() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        for i in 1..=150 {
            let content = format!("m{i}");
            repo.insert(text(room_id, 1, &content)).await.unwrap();
        }

        let page = repo.history(room_id, None, None, 50, false).await.unwrap();
        assert_eq!(page.messages.len(), 50);
        assert_eq!(page.messages.first().unwrap().room_seq, 150);
        assert_eq!(page.messages.last().unwrap().room_seq, 101);
        assert_eq!(page.next_before, Some(101));

        let page2 = repo
            .history(room_id, Some(101), None, 50, false)
            .await
            .unwrap();
        assert_eq!(page2.messages.first().unwrap().room_seq, 100);
        assert_eq!(page2.messages.last().unwrap().room_seq, 51);
    }

    #[tokio::test]
    async fn history_after_cursor_ascends() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        for i in 1..=10 {
            let content = format!("m{i}");
            repo.insert(text(room_id, 1, &content)).await.unwrap();
        }
        let page = repo
            .history(room_id, None, Some(7), 50, false)
            .await
            .unwrap();
        let seqs: Vec<i64> = page.messages.iter().map(|m| m.room_seq).collect();
        assert_eq!(seqs, vec![8, 9, 10]);
    }

    #[tokio::test]
    async fn flagged_messages_hidden_from_regular_history() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        repo.insert(text(room_id, 1, "clean")).await.unwrap();
        let mut flagged = text(room_id, 1, "sketchy");
        flagged.flagged = true;
        flagged.flag_reason = Some("spam");
        repo.insert(flagged).await.unwrap();

        let regular = repo.history(room_id, None, None, 50, false).await.unwrap();
        assert_eq!(regular.messages.len(), 1);

        let moderator = repo.history(room_id, None, None, 50, true).await.unwrap();
        assert_eq!(moderator.messages.len(), 2);
        assert_eq!(moderator.messages[0].status, MessageStatus::Flagged);
    }

    #[tokio::test]
    async fn edit_and_soft_delete_lifecycle() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        let msg = repo.insert(text(room_id, 1, "tpyo")).await.unwrap();

        repo.apply_edit(room_id, msg.room_seq, "typo").await.unwrap();
        let edited = repo.fetch(room_id, msg.room_seq).await.unwrap().unwrap();
        assert_eq!(edited.content, "typo");
        assert_eq!(edited.status, MessageStatus::Edited);
        assert!(edited.edited_at.is_some());

        repo.soft_delete(room_id, msg.room_seq, None).await.unwrap();
        let deleted = repo.fetch(room_id, msg.room_seq).await.unwrap().unwrap();
        assert_eq!(deleted.status, MessageStatus::Deleted);
        assert_eq!(deleted.room_seq, msg.room_seq);
        assert_eq!(deleted.created_at, msg.created_at);

        // Editing a deleted message is refused at the storage layer too.
        let err = repo.apply_edit(room_id, msg.room_seq, "zombie").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn search_skips_deleted_and_escapes_wildcards() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        repo.insert(text(room_id, 1, "100% organic")).await.unwrap();
        repo.insert(text(room_id, 1, "fully synthetic")).await.unwrap();
        let gone = repo.insert(text(room_id, 1, "100% deleted")).await.unwrap();
        repo.soft_delete(room_id, gone.room_seq, None).await.unwrap();

        let hits = repo.search(room_id, "100%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "100% organic");
    }

    #[tokio::test]
    async fn first_message_reactivates_inactive_room() {
        let db = test_db().await;
        let room_id = room(&db).await;
        db.rooms()
            .set_status(room_id, crate::db::RoomStatus::Inactive)
            .await
            .unwrap();

        db.messages().insert(text(room_id, 1, "wake up")).await.unwrap();
        let fetched = db.rooms().fetch(room_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, crate::db::RoomStatus::Active);
    }

    #[tokio::test]
    async fn stats_aggregate() {
        let db = test_db().await;
        let room_id = room(&db).await;
        let repo = db.messages();
        repo.insert(text(room_id, 1, "a")).await.unwrap();
        repo.insert(text(room_id, 2, "b")).await.unwrap();

        let stats = repo.room_stats(room_id).await.unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.messages_last_day, 2);
        assert_eq!(stats.distinct_authors, 2);

        assert_eq!(repo.principal_message_count(1).await.unwrap(), 1);

        let (total, rooms, active) = repo.global_stats().await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rooms, 1);
        assert_eq!(active, 1);

        let series = repo.daily_series(room_id, 7).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].1, 2);
    }

    #[tokio::test]
    async fn edit_window_boundary() {
        let now = 1_000_000_000;
        let msg = MessageRecord {
            id: 1,
            uuid: "u".into(),
            room_id: 1,
            room_seq: 1,
            author_id: Some(1),
            author_name: "a".into(),
            kind: MessageKind::Text,
            content: "x".into(),
            reply_to: None,
            attachments: vec![],
            mentions: vec![],
            status: MessageStatus::Sent,
            flagged: false,
            flag_reason: None,
            moderator_id: None,
            created_at: now,
            edited_at: None,
            deleted_at: None,
        };
        // Exactly 15 minutes later: allowed.
        assert!(msg.within_edit_window(now + 15 * 60 * 1000));
        // One second past: refused.
        assert!(!msg.within_edit_window(now + 15 * 60 * 1000 + 1000));
    }
}
