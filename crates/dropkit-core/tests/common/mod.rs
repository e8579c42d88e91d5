// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dropkit-core integration tests.
//!
//! Tests run against a real PostgreSQL pointed at by
//! `TEST_DROPKIT_DATABASE_URL` (or `DROPKIT_DATABASE_URL`), with a temp-dir
//! blob store and a frozen clock each test can advance.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use dropkit_core::blob::{BlobStore, FsBlobStore};
use dropkit_core::clock::FixedClock;
use dropkit_core::fanout::SubscriberRegistry;
use dropkit_core::lifecycle::{Lifecycle, LifecycleConfig};
use dropkit_core::sweeper::{ExpirySweeper, SweeperConfig};

/// Shared fixtures for one test.
pub struct TestContext {
    pub pool: PgPool,
    pub clock: Arc<FixedClock>,
    pub registry: Arc<SubscriberRegistry>,
    pub blobs: Arc<dyn BlobStore>,
    pub lifecycle: Lifecycle,
    _blob_dir: tempfile::TempDir,
}

impl TestContext {
    /// Connect, migrate, and assemble the service graph.
    pub async fn new() -> TestContext {
        let database_url = std::env::var("TEST_DROPKIT_DATABASE_URL")
            .or_else(|_| std::env::var("DROPKIT_DATABASE_URL"))
            .expect("TEST_DROPKIT_DATABASE_URL not set");

        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");
        dropkit_core::migrations::run(&pool)
            .await
            .expect("Failed to run migrations");

        let blob_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_dir.path()));

        // Truncate to microseconds so timestamps survive a TIMESTAMPTZ round
        // trip exactly.
        let start = DateTime::from_timestamp_micros(Utc::now().timestamp_micros())
            .expect("valid timestamp");
        let clock = Arc::new(FixedClock::new(start));
        let registry = Arc::new(SubscriberRegistry::new());

        let lifecycle = Lifecycle::new(
            pool.clone(),
            blobs.clone(),
            registry.clone(),
            clock.clone(),
            LifecycleConfig::default(),
        );

        TestContext {
            pool,
            clock,
            registry,
            blobs,
            lifecycle,
            _blob_dir: blob_dir,
        }
    }

    /// Build a sweeper over this context's pool, registry, and clock.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.pool.clone(),
            self.registry.clone(),
            self.clock.clone(),
            SweeperConfig::default(),
        )
    }
}
