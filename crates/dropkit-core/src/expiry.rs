// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Heuristic expiry prediction for drops without a caller-specified TTL.

use chrono::Duration;

/// Predict how long a drop should live.
///
/// Rules:
/// - file: 30 minutes
/// - text under 20 chars: 2 hours
/// - text 20-200 chars: 1 hour
/// - text over 200 chars: 10 minutes
/// - fallback: 1 hour
///
/// The result is a relative TTL; callers clamp the resulting absolute expiry
/// to the owning session's remaining lifetime.
pub fn predict_ttl(content: Option<&str>, is_file: bool) -> Duration {
    if is_file {
        return Duration::minutes(30);
    }

    if let Some(content) = content {
        let length = content.trim().chars().count();

        if length < 20 {
            return Duration::hours(2);
        }
        if length <= 200 {
            return Duration::hours(1);
        }
        return Duration::minutes(10);
    }

    Duration::hours(1)
}
