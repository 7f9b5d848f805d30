// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public facade consumed by the UI layer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use ticket_sync::{HttpTicketSource, InMemoryKvStore, StaticSession, SyncConfig, TicketsCache};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (_online_tx, online) = watch::channel(true);
//! let cache = TicketsCache::new(
//!     SyncConfig::default(),
//!     Arc::new(HttpTicketSource::new("https://api.example.test")),
//!     Arc::new(StaticSession::new("bearer-token")),
//!     Arc::new(InMemoryKvStore::new()),
//!     online,
//! )
//! .expect("valid config");
//!
//! cache.start("u1").await;
//! for ticket in cache.tickets() {
//!     println!("{} {}", ticket.route_label(), cache.status_of(&ticket));
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{ConfigError, SyncConfig};
use crate::coordinator::{CacheMetadata, CacheView, RefreshOutcome, SyncCoordinator, SyncTrigger};
use crate::error::SyncErrorKind;
use crate::feed::ChangeFeed;
use crate::remote::{RemoteTicketSource, SessionProvider};
use crate::storage::KvStore;
use crate::ticket::status::{derive_status, is_clickable, TicketStatus};
use crate::ticket::Ticket;

/// Offline-first ticket cache for one signed-in user at a time.
#[derive(Clone)]
pub struct TicketsCache {
    coordinator: Arc<SyncCoordinator>,
}

impl TicketsCache {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn RemoteTicketSource>,
        session: Arc<dyn SessionProvider>,
        kv: Arc<dyn KvStore>,
        connectivity: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        let coordinator = SyncCoordinator::new(config, source, session, kv, connectivity)?;
        Ok(Self {
            coordinator: Arc::new(coordinator),
        })
    }

    /// Like [`new`](Self::new), with realtime change notifications.
    pub fn with_change_feed(
        config: SyncConfig,
        source: Arc<dyn RemoteTicketSource>,
        session: Arc<dyn SessionProvider>,
        kv: Arc<dyn KvStore>,
        connectivity: watch::Receiver<bool>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Result<Self, ConfigError> {
        let coordinator = SyncCoordinator::new(config, source, session, kv, connectivity)?
            .with_change_feed(feed);
        Ok(Self {
            coordinator: Arc::new(coordinator),
        })
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    // ── Published state ──────────────────────────────────────────────

    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        self.coordinator.view().tickets
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.coordinator.view().loading
    }

    #[must_use]
    pub fn has_loaded(&self) -> bool {
        self.coordinator.view().has_loaded
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.coordinator.view().error
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<SyncErrorKind> {
        self.coordinator.view().error_kind
    }

    #[must_use]
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.coordinator.view().last_updated
    }

    /// Full published view in one read.
    #[must_use]
    pub fn view(&self) -> CacheView {
        self.coordinator.view()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CacheView> {
        self.coordinator.subscribe()
    }

    #[must_use]
    pub fn metadata(&self) -> CacheMetadata {
        self.coordinator.metadata()
    }

    // ── Derived status (read time, never stored) ─────────────────────

    #[must_use]
    pub fn status_of(&self, ticket: &Ticket) -> TicketStatus {
        derive_status(ticket, Utc::now())
    }

    #[must_use]
    pub fn is_clickable(&self, ticket: &Ticket) -> bool {
        is_clickable(ticket, Utc::now())
    }

    // ── Session lifecycle ────────────────────────────────────────────

    pub async fn start(&self, user_id: &str) -> Option<RefreshOutcome> {
        self.coordinator.start(user_id).await
    }

    pub async fn switch_user(&self, user_id: &str) -> Option<RefreshOutcome> {
        self.coordinator.switch_user(user_id).await
    }

    pub async fn stop(&self) {
        self.coordinator.stop().await;
    }

    pub async fn logout(&self) {
        self.coordinator.logout().await;
    }

    pub async fn clear_cache(&self) {
        self.coordinator.clear_cache().await;
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Forced refresh, as from pull-to-refresh.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.refresh(true, SyncTrigger::UserPull).await
    }

    /// Refresh unless the last successful sync is inside the throttle window.
    pub async fn refresh_if_stale(&self) -> RefreshOutcome {
        self.coordinator.refresh(false, SyncTrigger::UserPull).await
    }

    /// App returned to the foreground. Queues a forced refresh.
    pub fn on_foreground(&self) -> bool {
        self.coordinator.enqueue(SyncTrigger::Foregrounded)
    }

    /// Mark a ticket as being updated after a server-side mutation.
    pub async fn mark_updating(&self, ticket_id: &str) -> bool {
        self.coordinator.mark_updating(ticket_id).await
    }
}
