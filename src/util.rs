//! Time helpers shared by the feed state machine.
//!
//! This module contains:
//! - The reconnect backoff curve
//! - Wall-clock boundary alignment for scheduled refreshes
//!
//! IMPORTANT:
//! - Everything here is pure: callers pass `now` in, nothing reads
//!   the system clock.
//!

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ReconnectConfig;

/// Delay before the next reconnect attempt.
///
/// Formula:
///     min(base * factor^failures, max)
///
/// Examples (defaults 1000ms, 1.5, 15000ms):
/// - 0 failures -> 1000ms
/// - 2 failures -> 2250ms
/// - 7 failures -> 15000ms (capped)
///
pub fn backoff_delay(failures: u32, cfg: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
    let raw = cfg.base_delay_ms as f64 * cfg.growth_factor.powi(exponent);
    let capped = raw.min(cfg.max_delay_ms as f64);
    Duration::from_millis(capped.round() as u64)
}

/// Next instant strictly after `now` that sits `grace` past a multiple
/// of `cadence` (counted from the Unix epoch, so 5 minute cadences land
/// on :00, :05, :10 ... of every hour).
///
/// Examples (cadence 5m, grace 5s):
/// - 10:02:00 -> 10:05:05
/// - 10:00:03 -> 10:00:05
/// - 10:00:05 -> 10:05:05
///
/// Callers must ensure `grace < cadence` and `cadence > 0`
/// (`Config::validate` does).
pub fn next_refresh_at(now: DateTime<Utc>, cadence: Duration, grace: Duration) -> DateTime<Utc> {
    let cadence_ms = (cadence.as_millis() as i64).max(1);
    let grace_ms = grace.as_millis() as i64;

    let now_ms = now.timestamp_millis();
    let boundary = now_ms - now_ms.rem_euclid(cadence_ms);

    let mut candidate = boundary + grace_ms;
    if candidate <= now_ms {
        candidate += cadence_ms;
    }

    now + TimeDelta::milliseconds(candidate - now_ms)
}

/// Duration from `now` until `at`, zero if `at` is already past.
pub fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}
