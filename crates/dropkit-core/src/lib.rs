// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dropkit Core - Ephemeral Drop Sharing Engine
//!
//! Parties join a short-lived session with a 6-digit code and exchange
//! drops: text and code snippets or uploaded files, with real-time delivery
//! to all session members and strict one-time or time-boxed visibility.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Request handling (server)                   │
//! │                 rate governors consulted per request             │
//! └──────────────────────────────────────────────────────────────────┘
//!            │                                         │
//!            ▼                                         ▼
//! ┌─────────────────────┐  NEW_DROP / DELETE_DROP  ┌─────────────────┐
//! │  Lifecycle service  │─────────────────────────►│ Fan-out registry│
//! │  (sessions, drops,  │                          │ (per-session    │
//! │  consume protocols) │         ┌───────────────►│  subscribers)   │
//! └─────────────────────┘         │ evictions      └─────────────────┘
//!            │              ┌─────┴────────┐
//!            │              │Expiry sweeper│
//!            ▼              └──────────────┘
//! ┌─────────────────────┐         │
//! │     PostgreSQL      │◄────────┘
//! │ (sessions, drops)   │   conditional updates, affected-row counts
//! └─────────────────────┘
//! ```
//!
//! # Consume-exactly-once
//!
//! Burn-after-read drops and one-time download tokens are claimed through
//! single conditional updates; among any number of concurrent attempts the
//! store reports exactly one affected row, and only that winner emits an
//! event or receives the payload. No in-process locks are involved, so any
//! number of server instances can share the database.
//!
//! # Modules
//!
//! - [`blob`]: opaque storage for uploaded file bytes
//! - [`clock`]: wall-clock abstraction for deterministic TTL testing
//! - [`db`]: PostgreSQL operations and row types
//! - [`error`]: error taxonomy for lifecycle operations
//! - [`expiry`]: heuristic TTL prediction for drops
//! - [`fanout`]: per-session subscriber registry and event delivery
//! - [`lifecycle`]: session/drop creation and consumption protocols
//! - [`migrations`]: embedded schema migrations
//! - [`rate_limit`]: sliding/fixed-window request governors
//! - [`sweeper`]: background eviction of expired drops and sessions

#![deny(missing_docs)]

/// Opaque blob storage for uploaded file bytes.
pub mod blob;

/// Wall-clock abstraction used for TTL comparisons.
pub mod clock;

/// PostgreSQL database operations and row types.
pub mod db;

/// Error types for dropkit-core.
pub mod error;

/// Heuristic expiry prediction for drops.
pub mod expiry;

/// Per-session subscriber registry and event fan-out.
pub mod fanout;

/// Session and drop lifecycle service.
pub mod lifecycle;

/// Embedded database migrations.
pub mod migrations;

/// Request-rate governors.
pub mod rate_limit;

/// Background expiry sweeper.
pub mod sweeper;

pub use error::{Error, Result};
pub use lifecycle::{Lifecycle, LifecycleConfig};
