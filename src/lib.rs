// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Ticket Sync
//!
//! An offline-first ticket cache and sync engine for a mobile booking client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TicketsCache (facade)                      │
//! │  • tickets / loading / has_loaded / error / last_updated   │
//! │  • refresh(), start(), switch_user(), logout()             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SyncCoordinator                          │
//! │  • Single-flight + throttle + session epoch                │
//! │  • Run loop: connectivity, foreground, feed, timer         │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                    │
//!          ▼                   ▼                    ▼
//! ┌────────────────┐  ┌─────────────────┐  ┌──────────────────┐
//! │ RemoteTicket   │  │  merge + status │  │   CacheStore     │
//! │ Source (HTTP)  │  │  (pure)         │  │   over KvStore   │
//! └────────────────┘  └─────────────────┘  └──────────────────┘
//! ```
//!
//! Ticket status is never stored. It is derived at read time from the
//! ticket and the current clock, so a cached ticket expires on screen
//! without any sync.
//!
//! ## Modules
//!
//! - [`ticket`]: Ticket model, status derivation, normalization
//! - [`merge`]: Id-keyed snapshot merge
//! - [`storage`]: Key/value backends and the per-user [`CacheStore`]
//! - [`remote`]: Remote history source and session credentials
//! - [`feed`]: Change feed, subscription adapter, event coalescing
//! - [`coordinator`]: The [`SyncCoordinator`]
//! - [`retention`]: Optional eviction of long-expired tickets

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod merge;
pub mod metrics;
pub mod remote;
pub mod retention;
pub mod storage;
pub mod ticket;

pub use cache::TicketsCache;
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{
    CacheMetadata, CacheView, RefreshOutcome, SkipReason, SyncCoordinator, SyncPhase, SyncSummary,
    SyncTrigger,
};
pub use error::{SyncError, SyncErrorKind};
pub use feed::{ChangeEvent, ChangeFeed, ChangeFeedAdapter, ChangeOp, FeedError, FeedTopic, LocalChangeFeed};
pub use merge::{merge, MergeOutcome};
pub use remote::{HttpTicketSource, RemoteTicketSource, SessionProvider, StaticSession, TicketHistory};
pub use retention::RetentionPolicy;
pub use storage::{
    CacheSnapshot, CacheStore, InMemoryKvStore, KvStore, SqliteKvStore, StorageError,
    CURRENT_SCHEMA_VERSION,
};
pub use ticket::status::{derive_status, is_clickable, TicketStatus};
pub use ticket::{Operator, Ticket, TransportMode, Trip};
