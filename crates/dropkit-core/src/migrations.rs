// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for dropkit-core.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Migrations embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply all migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
