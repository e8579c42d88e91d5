// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database operations for dropkit-core.
//!
//! Plain async functions over a `PgPool`. Cross-instance invariants (unique
//! live codes, single-winner consumption) are enforced through conditional
//! updates checked via affected-row counts, never through in-process locks:
//! multiple server instances may share the store.
//!
//! Every timestamp comparison takes `now` as a parameter instead of calling
//! `NOW()` in SQL, so callers can substitute a test clock.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// Kind of payload carried by a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropKind {
    /// Plain text snippet.
    Text,
    /// Code snippet (rendered monospaced by clients).
    Code,
    /// Uploaded file, payload lives in the blob store.
    File,
}

impl DropKind {
    /// Stable string form used in the `drops.kind` column and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Code => "code",
            Self::File => "file",
        }
    }

    /// Parse the string form; `None` for unrecognized kinds.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "code" => Some(Self::Code),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Session record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRecord {
    /// Six-digit join code, unique among live sessions.
    pub code: String,
    /// When the session stops being live.
    pub expires_at: DateTime<Utc>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

/// Drop record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DropRecord {
    /// Monotonically assigned id; orders creation.
    pub id: i64,
    /// Owning session's code.
    pub session_code: String,
    /// Drop kind (`text` | `code` | `file`).
    pub kind: String,
    /// Inline payload for text/code drops, already escaped.
    pub content: Option<String>,
    /// Blob store reference for file drops.
    pub file_ref: Option<String>,
    /// Original upload filename (directory components stripped), file drops
    /// only. Clients see this, never the storage reference.
    pub file_name: Option<String>,
    /// When the drop was created.
    pub created_at: DateTime<Utc>,
    /// When the drop stops being visible; `None` means it lives as long
    /// as its session.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the first successful consume permanently hides the drop.
    pub burn_after_read: bool,
    /// Tombstone; once set the drop is excluded from every read path.
    pub is_deleted: bool,
    /// One-time download token, file drops only.
    pub download_token: Option<String>,
    /// One-time-download tombstone.
    pub is_downloaded: bool,
}

/// Fields for a new drop row.
#[derive(Debug)]
pub struct NewDrop<'a> {
    /// Owning session's code.
    pub session_code: &'a str,
    /// Drop kind string.
    pub kind: &'a str,
    /// Inline payload, already sanitized.
    pub content: Option<&'a str>,
    /// Blob store reference.
    pub file_ref: Option<&'a str>,
    /// Original upload filename, already stripped of directory components.
    pub file_name: Option<&'a str>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry timestamp, already clamped to the session's.
    pub expires_at: Option<DateTime<Utc>>,
    /// Burn-after-read flag, immutable after creation.
    pub burn_after_read: bool,
    /// One-time download token.
    pub download_token: Option<&'a str>,
}

/// Id/session pair captured for fan-out after a bulk eviction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EvictedDrop {
    /// Evicted drop id.
    pub id: i64,
    /// Session the eviction event must be delivered to.
    pub session_code: String,
}

const DROP_COLUMNS: &str = "id, session_code, kind, content, file_ref, file_name, created_at, \
     expires_at, burn_after_read, is_deleted, download_token, is_downloaded";

/// True if a live session currently holds the code.
pub async fn live_code_exists(pool: &PgPool, code: &str, now: DateTime<Utc>) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sessions WHERE code = $1 AND expires_at > $2)",
    )
    .bind(code)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Insert a session row.
///
/// Returns false when the code collided with an existing row (live or not
/// yet swept); the caller treats that as one failed generation attempt.
pub async fn insert_session(
    pool: &PgPool,
    code: &str,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (code, expires_at, created_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (code) DO NOTHING
        "#,
    )
    .bind(code)
    .bind(expires_at)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Get a session regardless of liveness.
pub async fn get_session(pool: &PgPool, code: &str) -> Result<Option<SessionRecord>> {
    let session = sqlx::query_as::<_, SessionRecord>(
        "SELECT code, expires_at, created_at FROM sessions WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

/// Get a session only if it is still live.
///
/// An expired-but-not-yet-swept row is absent to callers, independent of
/// whether the sweeper has physically removed it.
pub async fn get_live_session(
    pool: &PgPool,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<SessionRecord>> {
    let session = sqlx::query_as::<_, SessionRecord>(
        "SELECT code, expires_at, created_at FROM sessions WHERE code = $1 AND expires_at > $2",
    )
    .bind(code)
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(session)
}

/// Push a session's expiry to the given instant (test/admin hook; the next
/// sweep cycle evicts it). Returns false if the session row is absent.
pub async fn set_session_expiry(
    pool: &PgPool,
    code: &str,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE sessions SET expires_at = $2 WHERE code = $1")
        .bind(code)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Insert a drop and return the stored row.
pub async fn insert_drop(pool: &PgPool, new: &NewDrop<'_>) -> Result<DropRecord> {
    let record = sqlx::query_as::<_, DropRecord>(&format!(
        r#"
        INSERT INTO drops
            (session_code, kind, content, file_ref, file_name, created_at,
             expires_at, burn_after_read, download_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {DROP_COLUMNS}
        "#
    ))
    .bind(new.session_code)
    .bind(new.kind)
    .bind(new.content)
    .bind(new.file_ref)
    .bind(new.file_name)
    .bind(new.created_at)
    .bind(new.expires_at)
    .bind(new.burn_after_read)
    .bind(new.download_token)
    .fetch_one(pool)
    .await?;
    Ok(record)
}

/// Get a drop by id within a session, regardless of visibility.
pub async fn get_drop(
    pool: &PgPool,
    id: i64,
    session_code: &str,
) -> Result<Option<DropRecord>> {
    let record = sqlx::query_as::<_, DropRecord>(&format!(
        "SELECT {DROP_COLUMNS} FROM drops WHERE id = $1 AND session_code = $2"
    ))
    .bind(id)
    .bind(session_code)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Drops visible to readers, oldest first.
///
/// Visible means not tombstoned and not past a set expiry.
pub async fn list_visible_drops(
    pool: &PgPool,
    session_code: &str,
    now: DateTime<Utc>,
) -> Result<Vec<DropRecord>> {
    let records = sqlx::query_as::<_, DropRecord>(&format!(
        r#"
        SELECT {DROP_COLUMNS}
        FROM drops
        WHERE session_code = $1
          AND is_deleted = FALSE
          AND (expires_at IS NULL OR expires_at > $2)
        ORDER BY id ASC
        "#
    ))
    .bind(session_code)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Tombstone a burn-after-read drop.
///
/// Single conditional update; among any number of concurrent attempts
/// exactly one sees an affected row and returns true.
pub async fn consume_burn(pool: &PgPool, id: i64, session_code: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE drops
        SET is_deleted = TRUE
        WHERE id = $1
          AND session_code = $2
          AND burn_after_read = TRUE
          AND is_deleted = FALSE
        "#,
    )
    .bind(id)
    .bind(session_code)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Find a non-deleted drop by its one-time download token.
pub async fn find_drop_by_token(pool: &PgPool, token: &str) -> Result<Option<DropRecord>> {
    let record = sqlx::query_as::<_, DropRecord>(&format!(
        "SELECT {DROP_COLUMNS} FROM drops WHERE download_token = $1 AND is_deleted = FALSE"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

/// Claim a one-time download.
///
/// Returns true for the single winning transaction; a false return means a
/// concurrent caller already claimed it.
pub async fn mark_downloaded(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE drops SET is_downloaded = TRUE WHERE id = $1 AND is_downloaded = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Expired, not-yet-tombstoned drops (ids and session codes captured before
/// mutation, for fan-out).
pub async fn select_expired_drops(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<EvictedDrop>> {
    let expired = sqlx::query_as::<_, EvictedDrop>(
        r#"
        SELECT id, session_code
        FROM drops
        WHERE expires_at IS NOT NULL
          AND expires_at <= $1
          AND is_deleted = FALSE
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(expired)
}

/// Bulk-tombstone the given drops.
///
/// Predicate-guarded: a drop independently consumed between capture and this
/// update is a no-op. The returned set is exactly the rows this statement
/// transitioned, and is the sole source of eviction events.
pub async fn mark_drops_deleted(pool: &PgPool, ids: &[i64]) -> Result<Vec<EvictedDrop>> {
    let evicted = sqlx::query_as::<_, EvictedDrop>(
        r#"
        UPDATE drops
        SET is_deleted = TRUE
        WHERE id = ANY($1)
          AND is_deleted = FALSE
        RETURNING id, session_code
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(evicted)
}

/// Codes of sessions whose expiry has passed.
pub async fn expired_session_codes(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<String>> {
    let codes: Vec<String> =
        sqlx::query_scalar("SELECT code FROM sessions WHERE expires_at < $1")
            .bind(now)
            .fetch_all(pool)
            .await?;
    Ok(codes)
}

/// Hard-delete sessions and cascade their drops inside one transaction.
///
/// Returns the number of session rows deleted. Safe to re-run: deleting
/// already-deleted rows affects nothing.
pub async fn delete_sessions_cascade(pool: &PgPool, codes: &[String]) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM drops WHERE session_code = ANY($1)")
        .bind(codes)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM sessions WHERE code = ANY($1)")
        .bind(codes)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}
