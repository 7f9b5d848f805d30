// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session lifecycle: start, teardown, run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::feed::{ChangeEvent, EventCoalescer};
use crate::metrics;
use crate::storage::{CacheSnapshot, CacheStore};

use super::{
    ActiveSession, CacheView, RefreshOutcome, SessionHandle, SyncCoordinator, SyncPhase,
    SyncTrigger,
};

impl SyncCoordinator {
    /// Begin a session for `user_id`.
    ///
    /// Loads the persisted snapshot and publishes it immediately, subscribes
    /// the change feed, spawns the run loop, then performs one remote fetch
    /// if online. Starting the already-active user is a no-op; starting a
    /// different user tears the current session down first.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn start(self: &Arc<Self>, user_id: &str) -> Option<RefreshOutcome> {
        if let Some(current) = self.current_user() {
            if current == user_id {
                debug!("Session already active");
                return None;
            }
            info!(from = %current, to = %user_id, "Switching user");
            self.teardown().await;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let store = Arc::new(CacheStore::new(
            Arc::clone(&self.kv),
            user_id,
            self.config.schema_version,
            &self.config.key_prefix,
        ));

        let loaded = store.load_or_absent().await;
        if !self.is_current(epoch) {
            debug!("Start superseded while loading cache");
            return Some(RefreshOutcome::Superseded);
        }
        let cache_hit = loaded.is_some();
        let snapshot = loaded.unwrap_or_else(|| CacheSnapshot::empty(user_id, store.schema_version()));
        let online = self.is_online();

        info!(cached = snapshot.len(), cache_hit, online, "Session started");

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = SessionHandle {
            user_id: user_id.to_string(),
            epoch,
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
            last_success: Arc::new(Mutex::new(None)),
        };

        {
            let mut guard = self.active.lock();
            if !self.is_current(epoch) {
                return Some(RefreshOutcome::Superseded);
            }
            let tickets = snapshot.tickets.clone();
            let last_updated = snapshot.last_sync_timestamp;
            metrics::set_cached_tickets(tickets.len());
            *guard = Some(ActiveSession {
                handle,
                snapshot,
                cache_hit,
                triggers: trigger_tx,
                task: None,
            });
            self.view.send_replace(CacheView {
                user_id: Some(user_id.to_string()),
                tickets,
                loading: online,
                has_loaded: cache_hit,
                error: None,
                error_kind: None,
                last_updated,
                phase: SyncPhase::Idle,
            });
        }
        metrics::set_phase(&SyncPhase::Idle.to_string());

        if let Some(feed) = &self.feed {
            if let Err(e) = feed.subscribe(user_id, epoch, event_tx).await {
                warn!(error = %e, "Change feed unavailable, relying on timer and manual refresh");
            }
        } else {
            drop(event_tx);
        }

        let run_loop = SessionLoop {
            coordinator: Arc::downgrade(self),
            epoch,
            triggers: trigger_rx,
            events: event_rx,
            connectivity: self.connectivity.clone(),
            was_online: online,
            period: self.config.periodic_refresh(),
            coalescer: EventCoalescer::new(self.config.feed_debounce(), self.config.feed_max_coalesced),
        };
        let task = tokio::spawn(run_loop.run());
        let superseded = {
            let mut guard = self.active.lock();
            match guard.as_mut().filter(|s| s.handle.epoch == epoch) {
                Some(session) => {
                    session.task = Some(task);
                    false
                }
                None => {
                    task.abort();
                    true
                }
            }
        };
        if superseded {
            debug!("Start superseded while subscribing, releasing change feed");
            if let Some(feed) = &self.feed {
                feed.release(epoch).await;
            }
            return Some(RefreshOutcome::Superseded);
        }

        if online {
            Some(self.refresh(true, SyncTrigger::Start).await)
        } else {
            self.view.send_modify(|v| {
                v.loading = false;
                v.has_loaded = true;
            });
            debug!("Offline at start, showing cached snapshot only");
            Some(RefreshOutcome::Offline)
        }
    }

    /// Tear down the current session (if any) and start `user_id`.
    pub async fn switch_user(self: &Arc<Self>, user_id: &str) -> Option<RefreshOutcome> {
        self.teardown().await;
        self.start(user_id).await
    }

    /// End the session. Persisted data is kept.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        if let Some(user_id) = self.teardown().await {
            info!(user_id = %user_id, "Session stopped");
        }
    }

    /// End the session and delete its persisted snapshot.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) {
        let store = self.handle().map(|h| h.store);
        self.teardown().await;
        if let Some(store) = store {
            if let Err(e) = store.clear().await {
                warn!(user_id = %store.user_id(), error = %e, "Failed to delete snapshot on logout");
            }
            info!(user_id = %store.user_id(), "Logged out, snapshot deleted");
        }
    }

    /// Unsubscribe, stop the run loop and clear all in-memory state.
    /// Returns the user whose session ended.
    pub(super) async fn teardown(&self) -> Option<String> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let session = self.active.lock().take();

        if let Some(feed) = &self.feed {
            feed.unsubscribe().await;
        }

        let session = session?;
        if let Some(task) = session.task {
            task.abort();
        }
        self.view.send_replace(CacheView::default());
        metrics::set_phase(&SyncPhase::Stopped.to_string());
        metrics::set_cached_tickets(0);
        debug!(user_id = %session.handle.user_id, "Session torn down");
        Some(session.handle.user_id)
    }
}

/// Per-session consumer loop state.
///
/// Built in `start` so the connectivity baseline is the one the session
/// started with. Holds only a weak reference so dropping the coordinator
/// ends the loop.
struct SessionLoop {
    coordinator: Weak<SyncCoordinator>,
    epoch: u64,
    triggers: mpsc::UnboundedReceiver<SyncTrigger>,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    connectivity: watch::Receiver<bool>,
    was_online: bool,
    period: Duration,
    coalescer: EventCoalescer,
}

impl SessionLoop {
    async fn run(mut self) {
        let mut connectivity_open = true;
        let mut feed_open = true;

        // First tick one period from now; start() already fetched.
        let mut periodic = tokio::time::interval_at(Instant::now() + self.period, self.period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.coalescer.deadline();
            let mut flush = None;

            let trigger = tokio::select! {
                received = self.triggers.recv() => match received {
                    Some(trigger) => Some(trigger),
                    None => break,
                },

                event = self.events.recv(), if feed_open => match event {
                    Some(event) => {
                        metrics::record_feed_event(&event.table);
                        flush = self.coalescer.push(&event, Instant::now());
                        flush.map(|_| SyncTrigger::FeedChanged)
                    }
                    None => {
                        feed_open = false;
                        None
                    }
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    flush = self.coalescer.due(Instant::now());
                    flush.map(|_| SyncTrigger::FeedChanged)
                }

                _ = periodic.tick() => Some(SyncTrigger::Periodic),

                changed = self.connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        None
                    } else {
                        let online = *self.connectivity.borrow_and_update();
                        let restored = online && !self.was_online;
                        self.was_online = online;
                        restored.then_some(SyncTrigger::ConnectivityRestored)
                    }
                }
            };

            let Some(trigger) = trigger else {
                continue;
            };

            if let Some(reason) = flush {
                if let Some(batch) = self.coalescer.take() {
                    debug!(events = batch.events, reason = reason.as_str(), "Feed batch flushed");
                    metrics::record_feed_flush(batch.events, reason.as_str());
                }
            }

            let Some(coordinator) = self.coordinator.upgrade() else {
                break;
            };
            if !coordinator.is_current(self.epoch) {
                break;
            }
            let outcome = coordinator.refresh(true, trigger).await;
            debug!(trigger = %trigger, outcome = outcome.label(), "Triggered refresh finished");
        }

        debug!(epoch = self.epoch, "Session run loop exited");
    }
}
