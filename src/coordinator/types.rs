// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use chrono::{DateTime, Utc};

use crate::error::{SyncError, SyncErrorKind};
use crate::ticket::Ticket;

/// Coordinator phase for the active session.
///
/// ```text
/// Stopped ──start──► Loading ──success/failure──► Idle ──refresh──► Loading
///    ▲                                              │
///    └──────────────────stop / logout───────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No session
    #[default]
    Stopped,
    /// Session active, nothing in flight
    Idle,
    /// Remote sync in progress
    Loading,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
        }
    }
}

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    /// Initial fetch of a session
    Start,
    ConnectivityRestored,
    Foregrounded,
    /// Debounced change-feed burst
    FeedChanged,
    Periodic,
    /// Explicit pull-to-refresh or API call
    UserPull,
}

impl SyncTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ConnectivityRestored => "connectivity",
            Self::Foregrounded => "foreground",
            Self::FeedChanged => "feed",
            Self::Periodic => "periodic",
            Self::UserPull => "user_pull",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSession,
    /// Another refresh of this session is running
    InFlight,
    /// Non-forced call inside the throttle window
    Throttled,
}

/// Counts from a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSummary {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
    pub evicted: usize,
    /// Tickets in the snapshot afterwards
    pub total: usize,
}

/// How a refresh call ended. Refresh never returns an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Synced(SyncSummary),
    /// Connectivity down; the persisted snapshot was served instead
    Offline,
    /// Fetch failed; the previous snapshot stays visible
    Failed(SyncError),
    Skipped(SkipReason),
    /// The session changed while the fetch was outstanding; response dropped
    Superseded,
}

impl RefreshOutcome {
    /// Metric label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synced(_) => "synced",
            Self::Offline => "offline",
            Self::Failed(_) => "failed",
            Self::Skipped(_) => "skipped",
            Self::Superseded => "superseded",
        }
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

/// Everything the UI layer renders, published on every change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheView {
    pub user_id: Option<String>,
    /// Latest merged, sorted snapshot (possibly cache-only)
    pub tickets: Vec<Ticket>,
    pub loading: bool,
    /// True once the session has something to render; never cleared by errors
    pub has_loaded: bool,
    pub error: Option<String>,
    pub error_kind: Option<SyncErrorKind>,
    /// Last successful remote sync
    pub last_updated: Option<DateTime<Utc>>,
    pub phase: SyncPhase,
}

/// Session bookkeeping, for diagnostics screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    pub owner_user_id: Option<String>,
    pub ticket_count: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub schema_version: u32,
    /// Session began from a persisted snapshot
    pub cache_hit: bool,
    pub in_flight: bool,
    pub phase: SyncPhase,
}
