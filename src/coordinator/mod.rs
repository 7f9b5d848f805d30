// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] orchestrates fetch → normalize → merge → persist →
//! reload → publish for one user session at a time, and owns the per-session
//! run loop reacting to connectivity, foregrounding, change-feed bursts and a
//! periodic timer.
//!
//! # Lifecycle
//!
//! ```text
//! start(u) ─► load cache ─► publish ─► subscribe feed ─► spawn run loop ─► fetch (if online)
//! stop()   ─► bump epoch ─► unsubscribe ─► abort run loop ─► publish empty view
//! ```
//!
//! # Concurrency
//!
//! - Single-flight: an `AtomicBool` per session, taken with `compare_exchange`
//!   and released by a guard on every exit path.
//! - Session epoch: bumped on every start and teardown. A response that
//!   arrives after its session ended is dropped.
//! - Locks are `parking_lot` and never held across an `.await`.

mod lifecycle;
mod refresh;
mod types;

pub use types::{
    CacheMetadata, CacheView, RefreshOutcome, SkipReason, SyncPhase, SyncSummary, SyncTrigger,
};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::config::{ConfigError, SyncConfig};
use crate::feed::{ChangeFeed, ChangeFeedAdapter};
use crate::metrics;
use crate::remote::{RemoteTicketSource, SessionProvider};
use crate::retention::RetentionPolicy;
use crate::storage::{CacheSnapshot, CacheStore, KvStore};

/// Cheap, cloneable view of the active session used across awaits.
#[derive(Clone)]
pub(super) struct SessionHandle {
    pub(super) user_id: String,
    pub(super) epoch: u64,
    pub(super) store: Arc<CacheStore>,
    pub(super) in_flight: Arc<AtomicBool>,
    pub(super) last_success: Arc<Mutex<Option<Instant>>>,
}

pub(super) struct ActiveSession {
    pub(super) handle: SessionHandle,
    pub(super) snapshot: CacheSnapshot,
    pub(super) cache_hit: bool,
    pub(super) triggers: mpsc::UnboundedSender<SyncTrigger>,
    pub(super) task: Option<JoinHandle<()>>,
}

/// Releases the single-flight flag when dropped.
pub(super) struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    pub(super) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncCoordinator {
    pub(super) config: SyncConfig,
    pub(super) source: Arc<dyn RemoteTicketSource>,
    pub(super) session: Arc<dyn SessionProvider>,
    pub(super) kv: Arc<dyn KvStore>,
    pub(super) feed: Option<ChangeFeedAdapter>,
    pub(super) connectivity: watch::Receiver<bool>,
    pub(super) retention: RetentionPolicy,
    pub(super) active: Mutex<Option<ActiveSession>>,
    pub(super) view: watch::Sender<CacheView>,
    pub(super) epoch: AtomicU64,
}

impl SyncCoordinator {
    /// Create a coordinator with no active session.
    ///
    /// `connectivity` carries reachability: `true` when online.
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn RemoteTicketSource>,
        session: Arc<dyn SessionProvider>,
        kv: Arc<dyn KvStore>,
        connectivity: watch::Receiver<bool>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let retention = RetentionPolicy::from_days(config.retention_days);
        let (view, _) = watch::channel(CacheView::default());
        Ok(Self {
            config,
            source,
            session,
            kv,
            feed: None,
            connectivity,
            retention,
            active: Mutex::new(None),
            view,
            epoch: AtomicU64::new(0),
        })
    }

    /// Attach a change feed. Call before the first `start`.
    #[must_use]
    pub fn with_change_feed(mut self, feed: Arc<dyn ChangeFeed>) -> Self {
        self.feed = Some(ChangeFeedAdapter::new(feed));
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Latest published view.
    #[must_use]
    pub fn view(&self) -> CacheView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CacheView> {
        self.view.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<String> {
        self.active.lock().as_ref().map(|s| s.handle.user_id.clone())
    }

    #[must_use]
    pub fn metadata(&self) -> CacheMetadata {
        let phase = self.view.borrow().phase;
        match self.active.lock().as_ref() {
            Some(s) => CacheMetadata {
                owner_user_id: Some(s.handle.user_id.clone()),
                ticket_count: s.snapshot.len(),
                last_sync: s.snapshot.last_sync_timestamp,
                schema_version: s.handle.store.schema_version(),
                cache_hit: s.cache_hit,
                in_flight: s.handle.in_flight.load(Ordering::Acquire),
                phase,
            },
            None => CacheMetadata {
                owner_user_id: None,
                ticket_count: 0,
                last_sync: None,
                schema_version: self.config.schema_version,
                cache_hit: false,
                in_flight: false,
                phase,
            },
        }
    }

    /// Queue a forced refresh on the session's run loop.
    ///
    /// Returns false when no session is active.
    pub fn enqueue(&self, trigger: SyncTrigger) -> bool {
        match self.active.lock().as_ref() {
            Some(s) => s.triggers.send(trigger).is_ok(),
            None => false,
        }
    }

    /// Set the "being updated" marker on one ticket and persist best-effort.
    ///
    /// Returns false if the ticket is not in the current snapshot.
    pub async fn mark_updating(&self, ticket_id: &str) -> bool {
        let (store, snapshot) = {
            let mut guard = self.active.lock();
            let Some(session) = guard.as_mut() else {
                return false;
            };
            let Some(ticket) = session.snapshot.tickets.iter_mut().find(|t| t.id == ticket_id) else {
                return false;
            };
            ticket.sync.pending_update = true;
            let snapshot = session.snapshot.clone();
            self.view.send_modify(|v| v.tickets = snapshot.tickets.clone());
            (Arc::clone(&session.handle.store), snapshot)
        };

        if let Err(e) = store.save(&snapshot).await {
            warn!(ticket_id, error = %e, "Failed to persist update marker");
            metrics::record_persistence("save", false);
        }
        true
    }

    /// Delete the persisted snapshot and empty the in-memory one. The session
    /// stays active.
    pub async fn clear_cache(&self) {
        let Some(handle) = self.handle() else {
            return;
        };
        if let Err(e) = handle.store.clear().await {
            warn!(user_id = %handle.user_id, error = %e, "Failed to delete persisted snapshot");
        }

        let mut guard = self.active.lock();
        if let Some(session) = guard.as_mut().filter(|s| s.handle.epoch == handle.epoch) {
            session.snapshot = CacheSnapshot::empty(&handle.user_id, handle.store.schema_version());
            *handle.last_success.lock() = None;
            self.view.send_modify(|v| {
                v.tickets.clear();
                v.last_updated = None;
            });
            metrics::set_cached_tickets(0);
        }
    }

    pub(super) fn handle(&self) -> Option<SessionHandle> {
        self.active.lock().as_ref().map(|s| s.handle.clone())
    }

    pub(super) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    pub(super) fn set_phase(&self, phase: SyncPhase) {
        let changed = self.view.send_if_modified(|v| {
            if v.phase == phase {
                false
            } else {
                v.phase = phase;
                true
            }
        });
        if changed {
            metrics::set_phase(&phase.to_string());
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(mut session) = self.active.lock().take() {
            if let Some(task) = session.task.take() {
                task.abort();
            }
        }
    }
}
