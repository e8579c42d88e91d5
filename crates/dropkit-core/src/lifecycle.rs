// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session and drop lifecycle service.
//!
//! Creates sessions and drops, computes TTLs, enforces the visibility
//! invariants, and exposes the consume-exactly-once protocols. Every
//! cross-instance race (unique live codes, burn-after-read, one-time
//! download) is decided by a store-level conditional update, so any number
//! of processes can run this service against a shared database.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::clock::Clock;
use crate::db::{self, DropKind, DropRecord, NewDrop, SessionRecord};
use crate::error::{Error, Result};
use crate::expiry::predict_ttl;
use crate::fanout::{DropEvent, SubscriberRegistry};

/// Bounded attempts for unique-code generation.
const MAX_CODE_ATTEMPTS: u32 = 20;

/// Validation limits and defaults for the lifecycle service.
///
/// Knobs are consumed here but owned by the process configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a session lives from creation.
    pub session_ttl: Duration,
    /// Maximum text/code drop length in characters.
    pub max_text_chars: usize,
    /// Maximum file drop size in bytes.
    pub max_file_bytes: usize,
    /// Permitted file extensions (the filename's final segment).
    pub allowed_extensions: Vec<String>,
    /// Rejected extensions, matched against every dot-separated segment so
    /// disguised executables (`invoice.exe.txt`) are caught.
    pub forbidden_extensions: Vec<String>,
    /// Permitted declared content-type classes (prefix match). An absent
    /// declaration is accepted.
    pub allowed_content_types: Vec<String>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(1),
            max_text_chars: 5000,
            max_file_bytes: 5 * 1024 * 1024,
            allowed_extensions: ["txt", "md", "csv", "json", "pdf", "png", "jpg", "jpeg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            forbidden_extensions: ["exe", "bat", "cmd", "com", "msi", "dll", "scr", "sh", "ps1", "js"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_content_types: [
                "text/",
                "image/",
                "application/pdf",
                "application/json",
                "application/octet-stream",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Creates sessions and drops, enforces invariants, exposes the consumption
/// protocols, and publishes fan-out events for successful mutations.
pub struct Lifecycle {
    pool: PgPool,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl Lifecycle {
    /// Create the service over a shared pool, blob store, and registry.
    pub fn new(
        pool: PgPool,
        blobs: Arc<dyn BlobStore>,
        registry: Arc<SubscriberRegistry>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            pool,
            blobs,
            registry,
            clock,
            config,
        }
    }

    /// Create a session with a fresh 6-digit code.
    ///
    /// Candidates are drawn uniformly at random and checked for liveness
    /// uniqueness; the bounded retry fails with
    /// [`Error::ExhaustedCodespace`] rather than looping forever. The
    /// primary key on `sessions.code` decides check-then-insert races: a
    /// duplicate insert is just another collision.
    pub async fn create_session(&self) -> Result<SessionRecord> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            let now = self.clock.now();

            if db::live_code_exists(&self.pool, &code, now).await? {
                continue;
            }

            let expires_at = now + self.config.session_ttl;
            if db::insert_session(&self.pool, &code, expires_at, now).await? {
                info!(code, %expires_at, "Session created");
                return Ok(SessionRecord {
                    code,
                    expires_at,
                    created_at: now,
                });
            }
        }

        Err(Error::ExhaustedCodespace {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    /// Fetch a session, treating expired-but-unswept rows as absent.
    pub async fn get_live_session(&self, code: &str) -> Result<SessionRecord> {
        db::get_live_session(&self.pool, code, self.clock.now())
            .await?
            .ok_or_else(|| Error::SessionNotFound(code.to_string()))
    }

    /// Create a text or code drop.
    ///
    /// Content is escaped against markup injection before it is stored;
    /// expiry comes from the heuristic predictor clamped to the session's
    /// remaining lifetime. Publishes a `NEW_DROP` event on success.
    pub async fn create_text_drop(
        &self,
        session_code: &str,
        content: &str,
        kind: DropKind,
        burn_after_read: bool,
    ) -> Result<DropRecord> {
        if kind == DropKind::File {
            return Err(Error::InvalidInput(
                "file drops must be submitted as uploads".into(),
            ));
        }

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("content cannot be empty".into()));
        }
        if trimmed.chars().count() > self.config.max_text_chars {
            return Err(Error::InvalidInput(format!(
                "content exceeds {} characters",
                self.config.max_text_chars
            )));
        }

        let session = self.get_live_session(session_code).await?;
        let now = self.clock.now();
        let sanitized = sanitize_markup(trimmed);
        let expires_at = clamp_to_session(now + predict_ttl(Some(trimmed), false), &session);

        let record = db::insert_drop(
            &self.pool,
            &NewDrop {
                session_code,
                kind: kind.as_str(),
                content: Some(&sanitized),
                file_ref: None,
                file_name: None,
                created_at: now,
                expires_at: Some(expires_at),
                burn_after_read,
                download_token: None,
            },
        )
        .await?;

        debug!(drop_id = record.id, session_code, kind = kind.as_str(), "Text drop created");
        self.publish_new_drop(&record);
        Ok(record)
    }

    /// Create a file drop from uploaded bytes.
    ///
    /// Bytes land in the blob store under a fresh unique reference; the
    /// drop carries a cryptographically random one-time download token.
    /// Publishes a `NEW_DROP` event on success.
    pub async fn create_file_drop(
        &self,
        session_code: &str,
        filename: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<DropRecord> {
        let session = self.get_live_session(session_code).await?;

        let display_name = strip_directories(filename);
        let extension = validate_filename(&self.config, filename)?;
        validate_content_type(&self.config, content_type)?;
        if bytes.is_empty() {
            return Err(Error::InvalidInput("file cannot be empty".into()));
        }
        if bytes.len() > self.config.max_file_bytes {
            return Err(Error::InvalidInput(format!(
                "file exceeds {} bytes",
                self.config.max_file_bytes
            )));
        }

        let blob_ref = self.blobs.put(&extension, bytes).await?;
        let token = generate_download_token();
        let now = self.clock.now();
        let expires_at = clamp_to_session(now + predict_ttl(None, true), &session);

        let record = db::insert_drop(
            &self.pool,
            &NewDrop {
                session_code,
                kind: DropKind::File.as_str(),
                content: None,
                file_ref: Some(&blob_ref),
                file_name: Some(display_name),
                created_at: now,
                expires_at: Some(expires_at),
                burn_after_read: false,
                download_token: Some(&token),
            },
        )
        .await?;

        debug!(drop_id = record.id, session_code, blob_ref, "File drop created");
        self.publish_new_drop(&record);
        Ok(record)
    }

    /// Drops currently visible in a session, oldest first.
    pub async fn list_visible_drops(&self, session_code: &str) -> Result<Vec<DropRecord>> {
        self.get_live_session(session_code).await?;
        db::list_visible_drops(&self.pool, session_code, self.clock.now()).await
    }

    /// Consume a burn-after-read drop.
    ///
    /// Returns false without mutating anything when the drop is not
    /// burn-after-read. Otherwise one conditional update decides the race:
    /// exactly one concurrent caller gets true, and a `DELETE_DROP` event is
    /// published only for that winner.
    pub async fn consume_burn_after_read(&self, drop_id: i64, session_code: &str) -> Result<bool> {
        let record = db::get_drop(&self.pool, drop_id, session_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("drop {drop_id}")))?;

        if !record.burn_after_read {
            return Ok(false);
        }

        let consumed = db::consume_burn(&self.pool, drop_id, session_code).await?;
        if consumed {
            debug!(drop_id, session_code, "Burn-after-read drop consumed");
            self.registry
                .publish(session_code, &DropEvent::DeleteDrop { id: drop_id });
        }
        Ok(consumed)
    }

    /// Claim a one-time download token.
    ///
    /// The single winning caller gets the drop and its blob reference to
    /// stream; every loser observes [`Error::Gone`]. [`Error::NotFound`]
    /// means no non-deleted drop carries the token at all.
    pub async fn consume_one_time_download(&self, token: &str) -> Result<(DropRecord, String)> {
        let record = db::find_drop_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| Error::NotFound("invalid or expired link".into()))?;

        if record.is_downloaded {
            return Err(Error::Gone("file already downloaded".into()));
        }

        let Some(file_ref) = record.file_ref.clone() else {
            return Err(Error::Gone("file no longer stored".into()));
        };
        if !self.blobs.exists(&file_ref).await? {
            return Err(Error::Gone("file no longer stored".into()));
        }

        if !db::mark_downloaded(&self.pool, record.id).await? {
            // A concurrent caller won the conditional update.
            return Err(Error::Gone("file already downloaded".into()));
        }

        debug!(drop_id = record.id, "One-time download claimed");
        Ok((record, file_ref))
    }

    /// Push a session's expiry into the past; the next sweep evicts it.
    pub async fn force_expire_session(&self, code: &str) -> Result<()> {
        let expired_at = self.clock.now() - Duration::seconds(1);
        if !db::set_session_expiry(&self.pool, code, expired_at).await? {
            return Err(Error::SessionNotFound(code.to_string()));
        }
        info!(code, "Session force-expired");
        Ok(())
    }

    fn publish_new_drop(&self, record: &DropRecord) {
        self.registry.publish(
            &record.session_code,
            &DropEvent::NewDrop {
                id: record.id,
                kind: record.kind.clone(),
                content: record.content.clone(),
                path: record.file_ref.clone(),
                created_at: record.created_at,
                expires_at: record.expires_at,
                burn_after_read: record.burn_after_read,
            },
        );
    }
}

/// Uniformly random 6-digit session code.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..=999_999u32))
}

/// Cryptographically random one-time download token.
fn generate_download_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A drop never outlives its session.
fn clamp_to_session(candidate: DateTime<Utc>, session: &SessionRecord) -> DateTime<Utc> {
    candidate.min(session.expires_at)
}

/// Escape characters with meaning in markup contexts.
fn sanitize_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strip client-supplied directory components from a filename.
fn strip_directories(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// Validate a filename, returning its (lowercased) final extension.
///
/// Client-supplied directory components are stripped first; every
/// dot-separated segment after the stem is checked against the deny-list.
fn validate_filename(config: &LifecycleConfig, filename: &str) -> Result<String> {
    let name = strip_directories(filename);

    let segments: Vec<String> = name
        .split('.')
        .skip(1)
        .map(|s| s.to_ascii_lowercase())
        .collect();

    let extension = match segments.last() {
        Some(ext) if !ext.is_empty() => ext.clone(),
        _ => return Err(Error::InvalidInput("file must have an extension".into())),
    };

    for segment in &segments {
        if config.forbidden_extensions.iter().any(|f| f == segment) {
            return Err(Error::InvalidInput(format!(
                "file extension '{segment}' is not allowed"
            )));
        }
    }

    if !config.allowed_extensions.iter().any(|a| a == &extension) {
        return Err(Error::InvalidInput(format!(
            "file type '{extension}' is not allowed"
        )));
    }

    Ok(extension)
}

/// Check a declared content type against the allowed classes.
fn validate_content_type(config: &LifecycleConfig, content_type: Option<&str>) -> Result<()> {
    let Some(declared) = content_type else {
        return Ok(());
    };
    if !config
        .allowed_content_types
        .iter()
        .any(|allowed| declared.starts_with(allowed.as_str()))
    {
        return Err(Error::InvalidInput(format!(
            "content type '{declared}' is not allowed"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn download_tokens_are_unique_and_opaque() {
        let a = generate_download_token();
        let b = generate_download_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn markup_is_escaped() {
        assert_eq!(
            sanitize_markup("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
        assert_eq!(sanitize_markup("a & b \"c\""), "a &amp; b &quot;c&quot;");
        assert_eq!(sanitize_markup("plain text"), "plain text");
    }

    #[test]
    fn clamp_never_exceeds_session_expiry() {
        let now = Utc::now();
        let session = SessionRecord {
            code: "123456".into(),
            expires_at: now + Duration::hours(1),
            created_at: now,
        };

        assert_eq!(
            clamp_to_session(now + Duration::hours(2), &session),
            session.expires_at
        );
        assert_eq!(
            clamp_to_session(now + Duration::minutes(10), &session),
            now + Duration::minutes(10)
        );
    }

    #[test]
    fn filenames_require_an_extension() {
        let config = LifecycleConfig::default();
        assert!(validate_filename(&config, "README").is_err());
        assert!(validate_filename(&config, "trailing.").is_err());
        assert_eq!(validate_filename(&config, "notes.txt").unwrap(), "txt");
        assert_eq!(validate_filename(&config, "PHOTO.JPG").unwrap(), "jpg");
    }

    #[test]
    fn disguised_executables_are_rejected() {
        let config = LifecycleConfig::default();
        // Deny-list applies to every dot-separated segment, not just the last.
        assert!(validate_filename(&config, "invoice.exe.txt").is_err());
        assert!(validate_filename(&config, "setup.msi").is_err());
        assert!(validate_filename(&config, "script.sh.md").is_err());
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let config = LifecycleConfig::default();
        assert!(validate_filename(&config, "archive.zip").is_err());
        assert!(validate_filename(&config, "binary.bin").is_err());
    }

    #[test]
    fn strip_directories_keeps_the_base_name() {
        assert_eq!(strip_directories("../../etc/report.pdf"), "report.pdf");
        assert_eq!(strip_directories("C:\\Users\\me\\photo.png"), "photo.png");
        assert_eq!(strip_directories("plain.txt"), "plain.txt");
    }

    #[test]
    fn directory_components_are_stripped() {
        let config = LifecycleConfig::default();
        assert_eq!(
            validate_filename(&config, "../../etc/notes.txt").unwrap(),
            "txt"
        );
        assert_eq!(
            validate_filename(&config, "C:\\Users\\me\\photo.png").unwrap(),
            "png"
        );
    }

    #[test]
    fn content_type_classes_are_prefix_matched() {
        let config = LifecycleConfig::default();
        assert!(validate_content_type(&config, Some("text/plain")).is_ok());
        assert!(validate_content_type(&config, Some("image/png")).is_ok());
        assert!(validate_content_type(&config, Some("application/pdf")).is_ok());
        assert!(validate_content_type(&config, None).is_ok());
        assert!(validate_content_type(&config, Some("application/x-msdownload")).is_err());
        assert!(validate_content_type(&config, Some("video/mp4")).is_err());
    }
}
