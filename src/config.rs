// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the ticket sync engine.
//!
//! # Example
//!
//! ```
//! use ticket_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.throttle_secs, 30);
//! assert_eq!(config.periodic_refresh_secs, 300);
//!
//! // Tuned config
//! let config = SyncConfig {
//!     feed_debounce_ms: 200,
//!     retention_days: Some(180),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::storage::cache_store::CURRENT_SCHEMA_VERSION;

/// Configuration for the ticket sync engine.
///
/// All fields have defaults matching the production app's behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Non-forced refreshes within this many seconds of the last
    /// successful sync are skipped.
    #[serde(default = "default_throttle_secs")]
    pub throttle_secs: u64,

    /// Periodic forced refresh interval in seconds.
    #[serde(default = "default_periodic_refresh_secs")]
    pub periodic_refresh_secs: u64,

    /// Quiet window after a change-feed event before refreshing.
    #[serde(default = "default_feed_debounce_ms")]
    pub feed_debounce_ms: u64,

    /// Flush the change-feed coalescer early once this many events are pending.
    #[serde(default = "default_feed_max_coalesced")]
    pub feed_max_coalesced: usize,

    /// Upper bound on a single remote history fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Snapshot schema version. Persisted snapshots with another version
    /// are ignored (cold start).
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Evict expired tickets not synced for this many days.
    /// `None` keeps every ticket until explicit invalidation.
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// Storage key prefix; the full key is `{prefix}:{user_id}`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_throttle_secs() -> u64 { 30 }
fn default_periodic_refresh_secs() -> u64 { 300 } // 5 minutes
fn default_feed_debounce_ms() -> u64 { 150 }
fn default_feed_max_coalesced() -> usize { 64 }
fn default_fetch_timeout_secs() -> u64 { 15 }
fn default_schema_version() -> u32 { CURRENT_SCHEMA_VERSION }
fn default_key_prefix() -> String { "ticket_cache".to_string() }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_secs: default_throttle_secs(),
            periodic_refresh_secs: default_periodic_refresh_secs(),
            feed_debounce_ms: default_feed_debounce_ms(),
            feed_max_coalesced: default_feed_max_coalesced(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            schema_version: default_schema_version(),
            retention_days: None,
            key_prefix: default_key_prefix(),
        }
    }
}

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid config field '{field}': {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl SyncConfig {
    /// Check the config for values the coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.periodic_refresh_secs == 0 {
            return Err(ConfigError {
                field: "periodic_refresh_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError {
                field: "fetch_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if !(1..=10_000).contains(&self.feed_debounce_ms) {
            return Err(ConfigError {
                field: "feed_debounce_ms",
                reason: format!("{} is outside 1..=10000", self.feed_debounce_ms),
            });
        }
        if self.feed_max_coalesced == 0 {
            return Err(ConfigError {
                field: "feed_max_coalesced",
                reason: "must be greater than zero".into(),
            });
        }
        if self.key_prefix.is_empty() {
            return Err(ConfigError {
                field: "key_prefix",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    #[must_use]
    pub fn periodic_refresh(&self) -> Duration {
        Duration::from_secs(self.periodic_refresh_secs)
    }

    #[must_use]
    pub fn feed_debounce(&self) -> Duration {
        Duration::from_millis(self.feed_debounce_ms)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.throttle(), Duration::from_secs(30));
        assert_eq!(config.periodic_refresh(), Duration::from_secs(300));
        assert_eq!(config.feed_debounce(), Duration::from_millis(150));
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(config.retention_days.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"throttle_secs": 10, "retention_days": 90}"#).unwrap();
        assert_eq!(config.throttle_secs, 10);
        assert_eq!(config.retention_days, Some(90));
        assert_eq!(config.periodic_refresh_secs, 300);
        assert_eq!(config.key_prefix, "ticket_cache");
    }

    #[test]
    fn test_validate_rejects_zero_periodic() {
        let config = SyncConfig {
            periodic_refresh_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "periodic_refresh_secs");
    }

    #[test]
    fn test_validate_rejects_debounce_out_of_range() {
        let config = SyncConfig {
            feed_debounce_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "feed_debounce_ms");

        let config = SyncConfig {
            feed_debounce_ms: 60_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
