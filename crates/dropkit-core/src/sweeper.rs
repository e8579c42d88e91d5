// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background expiry sweeper.
//!
//! A single repeating task that tombstones expired drops, hard-deletes
//! expired sessions (cascading their drops), and emits `DELETE_DROP`
//! fan-out events for individually evicted drops.
//!
//! Every step is predicate-guarded and independently idempotent: re-running
//! a cycle after a crash affects zero additional rows, and concurrent
//! sweepers in other processes overlap safely (at most one affects each
//! row). Sweeps are not ordered relative to consumption calls; a drop
//! consumed just before a sweep simply yields no affected row here.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::db;
use crate::error::Result;
use crate::fanout::{DropEvent, SubscriberRegistry};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweep cycles.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl SweeperConfig {
    /// Load configuration from environment variables.
    ///
    /// - `DROPKIT_SWEEP_INTERVAL_SECS`: seconds between sweeps (default: 5)
    pub fn from_env() -> Self {
        let interval_secs = std::env::var("DROPKIT_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        Self {
            interval: Duration::from_secs(interval_secs),
        }
    }
}

/// Counts from one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Drops tombstoned this cycle.
    pub drops_evicted: u64,
    /// Sessions hard-deleted this cycle, cascading their drops.
    pub sessions_evicted: u64,
}

/// Background task that evicts expired drops and sessions.
pub struct ExpirySweeper {
    pool: PgPool,
    registry: Arc<SubscriberRegistry>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    shutdown: Arc<Notify>,
}

impl ExpirySweeper {
    /// Create a sweeper over a shared pool and fan-out registry.
    pub fn new(
        pool: PgPool,
        registry: Arc<SubscriberRegistry>,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    ///
    /// A failed cycle is logged and retried at the next interval; no partial
    /// state is left inconsistent because each store mutation is
    /// self-contained.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Expiry sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Sweep cycle failed");
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// One sweep cycle. Public so tests can drive sweeps deterministically.
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let now = self.clock.now();
        let mut stats = SweepStats::default();

        // Capture expired drops, then tombstone them with the predicate
        // re-checked: a drop consumed between capture and update is a no-op.
        let expired = db::select_expired_drops(&self.pool, now).await?;
        let evicted = if expired.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<i64> = expired.iter().map(|d| d.id).collect();
            db::mark_drops_deleted(&self.pool, &ids).await?
        };
        stats.drops_evicted = evicted.len() as u64;

        // Expired sessions: cascade-delete inside one transaction, then drop
        // their subscriber entries. Closing the channels is the disconnect
        // signal; cascaded drops get no per-drop events.
        let expired_codes = db::expired_session_codes(&self.pool, now).await?;
        if !expired_codes.is_empty() {
            stats.sessions_evicted =
                db::delete_sessions_cascade(&self.pool, &expired_codes).await?;
            for code in &expired_codes {
                self.registry.remove_session(code);
            }
        }

        // The affected-row set from the bulk update is the sole source of
        // events, so no row transition is ever announced twice.
        for drop_row in &evicted {
            self.registry
                .publish(&drop_row.session_code, &DropEvent::DeleteDrop { id: drop_row.id });
        }

        if stats.drops_evicted > 0 || stats.sessions_evicted > 0 {
            info!(
                drops_evicted = stats.drops_evicted,
                sessions_evicted = stats.sessions_evicted,
                "Sweep cycle completed"
            );
        } else {
            debug!("Sweep cycle completed, nothing expired");
        }

        Ok(stats)
    }
}
