// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Dropkit server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Redis connection URL for distributed rate governing (optional)
    pub redis_url: Option<String>,
    /// HTTP listen address
    pub listen_addr: SocketAddr,
    /// Directory for uploaded file blobs
    pub data_dir: PathBuf,
    /// Session lifetime in seconds
    pub session_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `DROPKIT_DATABASE_URL` (or `DATABASE_URL`): PostgreSQL connection string
    ///
    /// Optional (with defaults):
    /// - `DROPKIT_REDIS_URL` (or `REDIS_URL`): Redis URL; governors run
    ///   in-process when unset
    /// - `DROPKIT_PORT`: HTTP listen port (default: 8000)
    /// - `DROPKIT_DATA_DIR`: blob directory (default: `uploads`)
    /// - `DROPKIT_SESSION_TTL_SECS`: session lifetime (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DROPKIT_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::Missing("DROPKIT_DATABASE_URL"))?;

        let redis_url = std::env::var("DROPKIT_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .ok();

        let port: u16 = std::env::var("DROPKIT_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("DROPKIT_PORT", "must be a valid port number"))?;

        let data_dir = PathBuf::from(
            std::env::var("DROPKIT_DATA_DIR").unwrap_or_else(|_| "uploads".to_string()),
        );

        let session_ttl_secs: u64 = std::env::var("DROPKIT_SESSION_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DROPKIT_SESSION_TTL_SECS", "must be a positive integer")
            })?;

        Ok(Self {
            database_url,
            redis_url,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            data_dir,
            session_ttl_secs,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
