// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync error taxonomy.
//!
//! Every failure inside the engine is one of these. None of them escape
//! the public `start()` / `refresh()` contracts: the coordinator converts
//! them into [`crate::CacheView::error`] and [`crate::CacheView::error_kind`].

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transient transport failure, timeout, or unexpected server response.
    /// Retried implicitly by the next trigger.
    #[error("network error: {0}")]
    Network(String),

    /// Missing, expired, or rejected credentials (HTTP 401/403).
    #[error("authentication error: {0}")]
    Auth(String),

    /// Persisted snapshot could not be read; the cache degrades to empty.
    #[error("cache read error: {0}")]
    CacheRead(String),

    /// Persisted snapshot could not be written; memory stays authoritative.
    #[error("cache write error: {0}")]
    CacheWrite(String),

    /// Change-feed subscription failed; timer and manual refresh remain.
    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Machine-readable error category, published alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    Network,
    Auth,
    CacheRead,
    CacheWrite,
    Subscription,
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Network(_) => SyncErrorKind::Network,
            Self::Auth(_) => SyncErrorKind::Auth,
            Self::CacheRead(_) => SyncErrorKind::CacheRead,
            Self::CacheWrite(_) => SyncErrorKind::CacheWrite,
            Self::Subscription(_) => SyncErrorKind::Subscription,
        }
    }

    /// Whether the next trigger is expected to succeed without user action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }
}

impl SyncErrorKind {
    /// Label used for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::CacheRead => "cache_read",
            Self::CacheWrite => "cache_write",
            Self::Subscription => "subscription",
        }
    }
}

impl std::fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SyncError::Network("x".into()).kind(), SyncErrorKind::Network);
        assert_eq!(SyncError::Auth("x".into()).kind(), SyncErrorKind::Auth);
        assert_eq!(SyncError::CacheWrite("x".into()).kind(), SyncErrorKind::CacheWrite);
    }

    #[test]
    fn test_auth_is_not_transient() {
        assert!(!SyncError::Auth("token expired".into()).is_transient());
        assert!(SyncError::Network("timeout".into()).is_transient());
    }

    #[test]
    fn test_display_is_descriptive() {
        let err = SyncError::Network("request timed out after 15s".into());
        assert_eq!(format!("{}", err), "network error: request timed out after 15s");
        assert_eq!(format!("{}", SyncErrorKind::CacheRead), "cache_read");
    }
}
