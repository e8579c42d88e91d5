// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebSocket endpoint delivering fan-out events to session viewers.
//!
//! Each connection owns one subscriber handle; events arrive in publish
//! order on that handle. The registry closing the channel (session evicted
//! or process shutdown) is translated into a Close frame. Inbound frames are
//! ignored, the socket is broadcast-only.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::routes::{ApiError, AppState};

/// Upgrade `GET /ws/{code}` once the session is verified live.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    state.lifecycle.get_live_session(&code).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, code)))
}

async fn handle_socket(socket: WebSocket, state: AppState, code: String) {
    let (subscriber_id, mut events) = state.registry.subscribe(&code);
    debug!(code, subscriber = %subscriber_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let payload = match serde_json::to_string(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                debug!(code, error = %e, "Dropping unserializable event");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Channel closed: the session was evicted or the
                    // registry shut down. Tell the client and hang up.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.registry.unsubscribe(&code, subscriber_id);
    debug!(code, subscriber = %subscriber_id, "WebSocket disconnected");
}
