// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dropkit-core.
//!
//! `Gone` is deliberately distinct from `NotFound`: callers racing for a
//! one-time resource need to tell "never existed" apart from "existed but a
//! concurrent winner already claimed it".

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request content was malformed, oversized, or disallowed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The referenced session does not exist or is no longer live.
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    /// The requested resource is absent or no longer visible.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource existed but was already consumed.
    #[error("Gone: {0}")]
    Gone(String),

    /// A rate governor rejected the request.
    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited {
        /// Recommended delay in seconds before retrying.
        retry_after: u64,
    },

    /// No free session code was found within the attempt bound.
    ///
    /// Should never occur under correct configuration; surfaced as a server
    /// fault rather than retried unboundedly.
    #[error("Exhausted session code space after {attempts} attempts")]
    ExhaustedCodespace {
        /// Number of generation attempts made.
        attempts: u32,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Blob store I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using core Error.
pub type Result<T> = std::result::Result<T, Error>;
