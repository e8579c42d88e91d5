// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dropkit Server - HTTP/WebSocket surface over the dropkit lifecycle engine.
//!
//! Routes (see [`routes::router`]):
//! - session creation/join/lookup and forced expiry
//! - text/code and file drop submission
//! - burn-after-read consumption and one-time downloads
//! - per-session WebSocket event delivery
//!
//! The binary in `main.rs` wires configuration, the database pool, the blob
//! store, the optional Redis governor backend, and the background expiry
//! sweeper, then serves until interrupted.

#![deny(missing_docs)]

/// Configuration loading.
pub mod config;

/// HTTP routes, handlers, and error mapping.
pub mod routes;

/// WebSocket event delivery.
pub mod ws;
