// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-session subscriber registry and event fan-out.
//!
//! The registry is in-process and per-instance: subscribers registered here
//! are only reachable by this process's publish calls. Horizontal scaling
//! requires session-affine routing or an external relay bus; neither is a
//! concern of the registry itself.
//!
//! Delivery is best-effort and unordered across handles, but ordered per
//! handle: each subscriber owns its own channel, so events published for a
//! session arrive in publish order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Event delivered to session subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum DropEvent {
    /// A drop became visible in the session.
    #[serde(rename = "NEW_DROP")]
    NewDrop {
        /// Drop id.
        id: i64,
        /// Drop kind string (`text` | `code` | `file`).
        kind: String,
        /// Inline payload for text/code drops.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Blob reference for file drops.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// Creation timestamp.
        created_at: DateTime<Utc>,
        /// Expiry timestamp, if set.
        expires_at: Option<DateTime<Utc>>,
        /// Whether the drop burns after the first read.
        burn_after_read: bool,
    },

    /// A drop was consumed or evicted.
    #[serde(rename = "DELETE_DROP")]
    DeleteDrop {
        /// Drop id.
        id: i64,
    },
}

/// Identifies one subscriber connection within the registry.
pub type SubscriberId = Uuid;

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<DropEvent>,
}

/// Tracks live per-session subscribers and fans events out to them.
///
/// Owned by the process's top-level composition with an explicit
/// [`shutdown`](Self::shutdown), not held as an implicit singleton.
pub struct SubscriberRegistry {
    sessions: DashMap<String, Vec<Subscriber>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a new subscriber under a session code.
    ///
    /// Returns the handle id and the receiving end of the subscriber's
    /// event channel. The channel closing (receiver sees `None`) means the
    /// session was evicted or the registry shut down.
    pub fn subscribe(&self, code: &str) -> (SubscriberId, mpsc::UnboundedReceiver<DropEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.sessions
            .entry(code.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        debug!(code, subscriber = %id, "Subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber. Idempotent; removing an unknown handle is a
    /// no-op. The session's entry is dropped once its set becomes empty so
    /// churned sessions do not accumulate.
    pub fn unsubscribe(&self, code: &str, id: SubscriberId) {
        let mut now_empty = false;
        if let Some(mut subs) = self.sessions.get_mut(code) {
            subs.retain(|s| s.id != id);
            now_empty = subs.is_empty();
        }
        if now_empty {
            self.sessions.remove_if(code, |_, subs| subs.is_empty());
        }
    }

    /// Deliver an event to every subscriber currently registered under the
    /// code. Returns the number of successful deliveries.
    ///
    /// Iterates a snapshot taken at call time, so handles added or removed
    /// during delivery cannot corrupt iteration. A handle whose channel is
    /// closed is treated as dead and unsubscribed; failures are neither
    /// retried nor surfaced.
    pub fn publish(&self, code: &str, event: &DropEvent) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::UnboundedSender<DropEvent>)> =
            match self.sessions.get(code) {
                Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return 0,
            };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            debug!(code, subscriber = %id, "Dropping dead subscriber");
            self.unsubscribe(code, id);
        }

        delivered
    }

    /// Drop every subscriber of a session, closing their channels.
    ///
    /// Used by the sweeper on session eviction; the closed channel is the
    /// disconnect signal to connected viewers.
    pub fn remove_session(&self, code: &str) {
        self.sessions.remove(code);
    }

    /// Number of live subscribers for a session.
    pub fn subscriber_count(&self, code: &str) -> usize {
        self.sessions.get(code).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Number of sessions with at least one subscriber.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tear down the registry, disconnecting all subscribers.
    pub fn shutdown(&self) {
        self.sessions.clear();
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
