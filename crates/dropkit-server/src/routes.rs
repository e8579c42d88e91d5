// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP route handlers and error mapping.
//!
//! Thin translation layer: every handler checks its governor, calls one
//! lifecycle operation, and maps the domain error onto a status code with a
//! JSON `{"detail": ...}` body. Internal failures are logged here and never
//! leak their message to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use dropkit_core::blob::BlobStore;
use dropkit_core::db::{DropKind, DropRecord, SessionRecord};
use dropkit_core::fanout::SubscriberRegistry;
use dropkit_core::rate_limit::Governors;
use dropkit_core::{Error, Lifecycle};

use crate::ws::ws_handler;

/// Multipart bodies are capped above the stored file limit so the lifecycle
/// validation, not the transport, produces the rejection.
const UPLOAD_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Session/drop lifecycle service.
    pub lifecycle: Arc<Lifecycle>,
    /// Fan-out registry for WebSocket subscribers.
    pub registry: Arc<SubscriberRegistry>,
    /// Blob store serving one-time downloads.
    pub blobs: Arc<dyn BlobStore>,
    /// Per-purpose rate governors.
    pub governors: Arc<Governors>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/{code}", get(get_session))
        .route("/sessions/{code}/drops", get(list_drops))
        .route("/sessions/{code}/drops/text", post(create_text_drop))
        .route(
            "/sessions/{code}/drops/file",
            post(create_file_drop).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/sessions/{code}/drops/{id}/consume", post(consume_drop))
        .route("/sessions/{code}/expire", delete(expire_session))
        .route("/downloads/{token}", get(download))
        .route("/ws/{code}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Domain error carried to the HTTP edge.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::SessionNotFound(_) => (
                StatusCode::NOT_FOUND,
                "session not found or expired".to_string(),
            ),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::Gone(msg) => (StatusCode::GONE, msg.clone()),
            Error::RateLimited { retry_after } => {
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    Json(serde_json::json!({ "detail": "rate limit exceeded" })),
                )
                    .into_response();
            }
            other => {
                error!(error = %other, "Internal error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct SessionView {
    code: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRecord> for SessionView {
    fn from(s: SessionRecord) -> Self {
        Self {
            code: s.code,
            created_at: s.created_at,
            expires_at: s.expires_at,
        }
    }
}

/// Client-facing drop shape; blob references stay internal, file drops are
/// addressed through their download token instead.
#[derive(Debug, Serialize)]
struct DropView {
    id: i64,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_token: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    burn_after_read: bool,
}

impl From<DropRecord> for DropView {
    fn from(d: DropRecord) -> Self {
        Self {
            id: d.id,
            kind: d.kind,
            content: d.content,
            file_name: d.file_name,
            download_token: d.download_token,
            created_at: d.created_at,
            expires_at: d.expires_at,
            burn_after_read: d.burn_after_read,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    code: String,
}

#[derive(Debug, Deserialize)]
struct TextDropRequest {
    content: String,
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    burn_after_read: bool,
}

fn default_kind() -> String {
    "text".to_string()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_session(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .governors
        .per_address
        .check(&format!("rate:addr:{}", addr.ip()))
        .await?;

    let session = state.lifecycle.create_session().await?;
    Ok((StatusCode::CREATED, Json(SessionView::from(session))))
}

async fn get_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.lifecycle.get_live_session(&code).await?;
    Ok(Json(session.into()))
}

async fn join_session(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.lifecycle.get_live_session(&req.code).await?;
    Ok(Json(session.into()))
}

async fn list_drops(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<DropView>>, ApiError> {
    state
        .governors
        .per_session
        .check(&format!("rate:session:{code}"))
        .await?;

    let drops = state.lifecycle.list_visible_drops(&code).await?;
    Ok(Json(drops.into_iter().map(DropView::from).collect()))
}

async fn create_text_drop(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<TextDropRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .governors
        .text_drops
        .check(&format!("rate:text:{code}"))
        .await?;

    let kind = DropKind::parse(&req.kind)
        .ok_or_else(|| Error::InvalidInput(format!("unknown drop kind '{}'", req.kind)))?;

    let record = state
        .lifecycle
        .create_text_drop(&code, &req.content, kind, req.burn_after_read)
        .await?;
    Ok((StatusCode::CREATED, Json(DropView::from(record))))
}

async fn create_file_drop(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(code): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    state
        .governors
        .file_drops
        .check(&format!("rate:file:{code}"))
        .await?;
    state
        .governors
        .per_address
        .check(&format!("rate:addr:{}", addr.ip()))
        .await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .ok_or_else(|| Error::InvalidInput("upload is missing a filename".into()))?
            .to_string();
        let content_type = field.content_type().map(|ct| ct.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidInput(format!("failed to read upload: {e}")))?;

        let record = state
            .lifecycle
            .create_file_drop(&code, &filename, content_type.as_deref(), &bytes)
            .await?;
        return Ok((StatusCode::CREATED, Json(DropView::from(record))));
    }

    Err(Error::InvalidInput("multipart body must contain a 'file' field".into()).into())
}

async fn consume_drop(
    State(state): State<AppState>,
    Path((code, id)): Path<(String, i64)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let consumed = state.lifecycle.consume_burn_after_read(id, &code).await?;
    Ok(Json(serde_json::json!({ "consumed": consumed })))
}

async fn expire_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.force_expire_session(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let (record, file_ref) = state.lifecycle.consume_one_time_download(&token).await?;

    let bytes = state
        .blobs
        .get(&file_ref)
        .await?
        .ok_or_else(|| Error::Gone("file no longer stored".to_string()))?;

    // The original upload name is what the client saves as; the storage
    // reference never leaves the server.
    let filename = record.file_name.as_deref().unwrap_or("download");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, content_disposition(filename)),
        ],
        bytes,
    )
        .into_response())
}

/// Attachment header with the filename quoted; quotes, backslashes, and
/// control characters are replaced so the value cannot break out of the
/// quoted string.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c == '"' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}
