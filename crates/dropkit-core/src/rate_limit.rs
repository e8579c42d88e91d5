// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-rate governors.
//!
//! Two interchangeable strategies behind one `check(key)` contract:
//!
//! - [`SlidingWindowGovernor`]: a Redis sorted set of request timestamps per
//!   key; stale entries are discarded, survivors counted, and the new
//!   timestamp recorded with the key's expiry refreshed to the window.
//! - [`FixedWindowGovernor`]: a Redis counter per key, expiry set on the
//!   first increment of the window, remaining TTL reported as retry-after.
//!
//! Both degrade to an in-process window when constructed without a Redis
//! connection (isolated tests, Redis not configured), and fail open on
//! transient Redis errors: a governor must never block a request on
//! infrastructure, availability wins over strict limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::error::{Error, Result};

/// Connect a Redis backend for distributed rate governing.
///
/// The returned manager reconnects automatically; individual command
/// failures while disconnected surface as errors, which governors treat as
/// fail-open.
pub async fn connect(redis_url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    ConnectionManager::new(client).await
}

/// Limit/window pair for one governor.
#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    /// Maximum requests permitted inside one window.
    pub limit: u64,
    /// Window length.
    pub window: Duration,
}

impl GovernorConfig {
    /// Shorthand constructor.
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Seconds since the epoch as a float; scores in the sorted set.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Sliding-window governor over a per-key sorted set of request timestamps.
pub struct SlidingWindowGovernor {
    redis: Option<ConnectionManager>,
    config: GovernorConfig,
    local: Mutex<HashMap<String, Vec<f64>>>,
}

impl SlidingWindowGovernor {
    /// Create a governor; `None` for the Redis connection selects the
    /// in-process window.
    pub fn new(redis: Option<ConnectionManager>, config: GovernorConfig) -> Self {
        Self {
            redis,
            config,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// In-process governor, bounded only by process memory and reset on
    /// restart.
    pub fn in_process(config: GovernorConfig) -> Self {
        Self::new(None, config)
    }

    /// Admit or reject one request under the key.
    ///
    /// Synchronous-fast: either permits immediately or rejects with
    /// [`Error::RateLimited`] carrying a recommended retry delay.
    pub async fn check(&self, key: &str) -> Result<()> {
        match &self.redis {
            Some(conn) => match self.check_redis(conn.clone(), key).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(error = %e, key, "Rate governor backend unreachable, failing open");
                    Ok(())
                }
            },
            None => self.check_local(key),
        }
    }

    async fn check_redis(
        &self,
        mut conn: ConnectionManager,
        key: &str,
    ) -> redis::RedisResult<Result<()>> {
        let now = unix_now();
        let window = self.config.window.as_secs_f64();

        let _: () = conn.zrembyscore(key, 0.0, now - window).await?;
        let count: u64 = conn.zcard(key).await?;

        if count >= self.config.limit {
            // The oldest surviving entry bounds how long the caller waits.
            let oldest: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
            let retry_after = oldest
                .first()
                .map(|(_, score)| (score + window - now).ceil().max(1.0) as u64)
                .unwrap_or_else(|| self.config.window.as_secs());
            return Ok(Err(Error::RateLimited { retry_after }));
        }

        let _: () = conn.zadd(key, format!("{now:.6}"), now).await?;
        let _: () = conn.expire(key, self.config.window.as_secs() as i64).await?;
        Ok(Ok(()))
    }

    fn check_local(&self, key: &str) -> Result<()> {
        let now = unix_now();
        let window = self.config.window.as_secs_f64();

        let mut local = self.local.lock().unwrap();
        let timestamps = local.entry(key.to_string()).or_default();
        timestamps.retain(|&t| t > now - window);

        if timestamps.len() as u64 >= self.config.limit {
            // Timestamps are pushed in order, so the first is the oldest.
            let retry_after = timestamps
                .first()
                .map(|&t| (t + window - now).ceil().max(1.0) as u64)
                .unwrap_or_else(|| self.config.window.as_secs());
            return Err(Error::RateLimited { retry_after });
        }

        timestamps.push(now);
        Ok(())
    }
}

/// Fixed-window counter governor, lighter weight than the sliding window.
pub struct FixedWindowGovernor {
    redis: Option<ConnectionManager>,
    config: GovernorConfig,
    local: Mutex<HashMap<String, LocalWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct LocalWindow {
    count: u64,
    window_end: f64,
}

impl FixedWindowGovernor {
    /// Create a governor; `None` for the Redis connection selects the
    /// in-process window.
    pub fn new(redis: Option<ConnectionManager>, config: GovernorConfig) -> Self {
        Self {
            redis,
            config,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// In-process governor.
    pub fn in_process(config: GovernorConfig) -> Self {
        Self::new(None, config)
    }

    /// Admit or reject one request under the key.
    pub async fn check(&self, key: &str) -> Result<()> {
        match &self.redis {
            Some(conn) => match self.check_redis(conn.clone(), key).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(error = %e, key, "Rate governor backend unreachable, failing open");
                    Ok(())
                }
            },
            None => self.check_local(key),
        }
    }

    async fn check_redis(
        &self,
        mut conn: ConnectionManager,
        key: &str,
    ) -> redis::RedisResult<Result<()>> {
        let count: u64 = conn.incr(key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(key, self.config.window.as_secs() as i64).await?;
        }
        if count > self.config.limit {
            let ttl: i64 = conn.ttl(key).await?;
            return Ok(Err(Error::RateLimited {
                retry_after: ttl.max(1) as u64,
            }));
        }
        Ok(Ok(()))
    }

    fn check_local(&self, key: &str) -> Result<()> {
        let now = unix_now();
        let window = self.config.window.as_secs_f64();

        let mut local = self.local.lock().unwrap();
        let entry = local.entry(key.to_string()).or_insert(LocalWindow {
            count: 0,
            window_end: now + window,
        });
        if now >= entry.window_end {
            entry.count = 0;
            entry.window_end = now + window;
        }
        entry.count += 1;

        if entry.count > self.config.limit {
            let retry_after = (entry.window_end - now).ceil().max(1.0) as u64;
            return Err(Error::RateLimited { retry_after });
        }
        Ok(())
    }
}

/// Limits for the per-purpose governors.
#[derive(Debug, Clone)]
pub struct GovernorsConfig {
    /// General per-client-address limit.
    pub per_address: GovernorConfig,
    /// Per-session action limit.
    pub per_session: GovernorConfig,
    /// Text/code drop submission limit per session.
    pub text_drops: GovernorConfig,
    /// File drop submission limit per session.
    pub file_drops: GovernorConfig,
}

impl Default for GovernorsConfig {
    fn default() -> Self {
        Self {
            per_address: GovernorConfig::new(5, 60),
            per_session: GovernorConfig::new(10, 60),
            text_drops: GovernorConfig::new(20, 60),
            file_drops: GovernorConfig::new(5, 60),
        }
    }
}

/// Per-purpose governors with independent limits, sharing one backend.
pub struct Governors {
    /// General per-client-address governor.
    pub per_address: SlidingWindowGovernor,
    /// Per-session action governor.
    pub per_session: SlidingWindowGovernor,
    /// Text/code drop submission governor.
    pub text_drops: SlidingWindowGovernor,
    /// File drop submission governor.
    pub file_drops: SlidingWindowGovernor,
}

impl Governors {
    /// Build the governor set over an optional shared Redis backend.
    pub fn new(redis: Option<ConnectionManager>, config: &GovernorsConfig) -> Self {
        Self {
            per_address: SlidingWindowGovernor::new(redis.clone(), config.per_address),
            per_session: SlidingWindowGovernor::new(redis.clone(), config.per_session),
            text_drops: SlidingWindowGovernor::new(redis.clone(), config.text_drops),
            file_drops: SlidingWindowGovernor::new(redis, config.file_drops),
        }
    }
}
