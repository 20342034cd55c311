//! Configuration types

use crate::{ConfigError, MeshtraceError, MeshtraceResult, Timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cooldown before re-probing a node that has no stored result (3 hours).
pub const DEFAULT_COLD_RETRY_COOLDOWN_SECS: u64 = 3 * 3600;

/// Default cooldown before re-probing a node that already has a result (24 hours).
pub const DEFAULT_STALE_RETRY_COOLDOWN_SECS: u64 = 24 * 3600;

/// Default interval between scheduling ticks (3 minutes).
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 180;

/// Default interval between segment cleanup sweeps (1 hour).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Default retention for ordinary segment observations (30 days).
pub const DEFAULT_SEGMENT_RETENTION_SECS: u64 = 30 * 86400;

/// Default window for the "longest recent segment" query (7 days).
pub const DEFAULT_ACTIVE_SEGMENT_WINDOW_SECS: u64 = 7 * 86400;

/// Traceroute subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteConfig {
    /// Cooldown for nodes with no stored result for (local -> node).
    pub cold_retry_cooldown: Duration,
    /// Cooldown for nodes that already have a stored result.
    pub stale_retry_cooldown: Duration,
    /// Only consider nodes heard within this window. `None` disables the filter.
    pub max_last_heard_age: Option<Duration>,
    /// How often the background job runs a scheduling tick.
    pub tick_interval: Duration,
    /// How often the background job prunes old segment observations.
    pub cleanup_interval: Duration,
    /// Observations older than this are pruned (record holder exempt).
    pub segment_retention: Duration,
    /// Window used for the "longest recent segment" query.
    pub active_segment_window: Duration,
}

impl Default for TracerouteConfig {
    fn default() -> Self {
        Self {
            cold_retry_cooldown: Duration::from_secs(DEFAULT_COLD_RETRY_COOLDOWN_SECS),
            stale_retry_cooldown: Duration::from_secs(DEFAULT_STALE_RETRY_COOLDOWN_SECS),
            max_last_heard_age: None,
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            segment_retention: Duration::from_secs(DEFAULT_SEGMENT_RETENTION_SECS),
            active_segment_window: Duration::from_secs(DEFAULT_ACTIVE_SEGMENT_WINDOW_SECS),
        }
    }
}

impl TracerouteConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables (all in seconds):
    /// - `MESHTRACE_COLD_RETRY_COOLDOWN_SECS` (default: 10800)
    /// - `MESHTRACE_STALE_RETRY_COOLDOWN_SECS` (default: 86400)
    /// - `MESHTRACE_MAX_LAST_HEARD_AGE_SECS` (default: unset, filter off)
    /// - `MESHTRACE_TICK_INTERVAL_SECS` (default: 180)
    /// - `MESHTRACE_CLEANUP_INTERVAL_SECS` (default: 3600)
    /// - `MESHTRACE_SEGMENT_RETENTION_SECS` (default: 2592000)
    /// - `MESHTRACE_ACTIVE_SEGMENT_WINDOW_SECS` (default: 604800)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any `name -> value` source, with fallback to defaults.
    ///
    /// Unset or unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |name: &str| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            cold_retry_cooldown: secs("MESHTRACE_COLD_RETRY_COOLDOWN_SECS")
                .unwrap_or(defaults.cold_retry_cooldown),
            stale_retry_cooldown: secs("MESHTRACE_STALE_RETRY_COOLDOWN_SECS")
                .unwrap_or(defaults.stale_retry_cooldown),
            max_last_heard_age: secs("MESHTRACE_MAX_LAST_HEARD_AGE_SECS")
                .or(defaults.max_last_heard_age),
            tick_interval: secs("MESHTRACE_TICK_INTERVAL_SECS").unwrap_or(defaults.tick_interval),
            cleanup_interval: secs("MESHTRACE_CLEANUP_INTERVAL_SECS")
                .unwrap_or(defaults.cleanup_interval),
            segment_retention: secs("MESHTRACE_SEGMENT_RETENTION_SECS")
                .unwrap_or(defaults.segment_retention),
            active_segment_window: secs("MESHTRACE_ACTIVE_SEGMENT_WINDOW_SECS")
                .unwrap_or(defaults.active_segment_window),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every interval and window is positive
    /// - the stale cooldown is not shorter than the cold cooldown
    pub fn validate(&self) -> MeshtraceResult<()> {
        let required = [
            ("cold_retry_cooldown", self.cold_retry_cooldown),
            ("stale_retry_cooldown", self.stale_retry_cooldown),
            ("tick_interval", self.tick_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("segment_retention", self.segment_retention),
            ("active_segment_window", self.active_segment_window),
        ];
        for (field, value) in required {
            if value.is_zero() {
                return Err(invalid(field, value, "must be positive"));
            }
        }

        if let Some(age) = self.max_last_heard_age {
            if age.is_zero() {
                return Err(invalid("max_last_heard_age", age, "must be positive when set"));
            }
        }

        if self.stale_retry_cooldown < self.cold_retry_cooldown {
            return Err(invalid(
                "stale_retry_cooldown",
                self.stale_retry_cooldown,
                "must not be shorter than cold_retry_cooldown",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: Duration, reason: &str) -> MeshtraceError {
    MeshtraceError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason: reason.to_string(),
    })
}

/// `now - window`, saturating at the earliest representable instant.
pub fn cutoff_before(now: Timestamp, window: Duration) -> Timestamp {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// =============================================================================
// TESTS
// =============================================================================
