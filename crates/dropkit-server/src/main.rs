// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dropkit Server - Ephemeral Drop Sharing
//!
//! Process bootstrap: configuration, database pool and migrations, blob
//! store, optional Redis governor backend, fan-out registry, expiry
//! sweeper, and the axum HTTP/WebSocket server with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use dropkit_core::blob::{BlobStore, FsBlobStore};
use dropkit_core::clock::{Clock, SystemClock};
use dropkit_core::fanout::SubscriberRegistry;
use dropkit_core::rate_limit::{Governors, GovernorsConfig};
use dropkit_core::sweeper::{ExpirySweeper, SweeperConfig};
use dropkit_core::{Lifecycle, LifecycleConfig};

use dropkit_server::config::Config;
use dropkit_server::routes::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dropkit_server=info".parse()?)
                .add_directive("dropkit_core=info".parse()?),
        )
        .init();

    info!("Starting Dropkit Server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        session_ttl_secs = config.session_ttl_secs,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    dropkit_core::migrations::run(&pool).await?;
    info!("Migrations completed");

    // Governors fall back to in-process windows when Redis is absent.
    let redis = match &config.redis_url {
        Some(url) => match dropkit_core::rate_limit::connect(url).await {
            Ok(conn) => {
                info!("Rate-governor Redis backend connected");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, rate governors run in-process");
                None
            }
        },
        None => {
            info!("No Redis configured, rate governors run in-process");
            None
        }
    };

    tokio::fs::create_dir_all(&config.data_dir).await?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.data_dir));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(SubscriberRegistry::new());

    let lifecycle_config = LifecycleConfig {
        session_ttl: chrono::Duration::seconds(config.session_ttl_secs as i64),
        ..LifecycleConfig::default()
    };
    let lifecycle = Arc::new(Lifecycle::new(
        pool.clone(),
        blobs.clone(),
        registry.clone(),
        clock.clone(),
        lifecycle_config,
    ));
    let governors = Arc::new(Governors::new(redis, &GovernorsConfig::default()));

    let sweeper = Arc::new(ExpirySweeper::new(
        pool.clone(),
        registry.clone(),
        clock,
        SweeperConfig::from_env(),
    ));
    let sweeper_shutdown = sweeper.shutdown_handle();
    let sweeper_task = tokio::spawn({
        let sweeper = sweeper.clone();
        async move { sweeper.run().await }
    });

    let state = AppState {
        lifecycle,
        registry: registry.clone(),
        blobs,
        governors,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Dropkit server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Shutting down...");
    sweeper_shutdown.notify_one();
    let _ = sweeper_task.await;
    registry.shutdown();
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
