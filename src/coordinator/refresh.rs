// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The refresh pipeline.
//!
//! ```text
//! guard checks ─► offline? ─► token ─► fetch (timeout) ─► epoch check
//!     ─► normalize ─► merge ─► retention ─► save ─► reload ─► publish
//! ```

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    InFlightGuard, RefreshOutcome, SessionHandle, SkipReason, SyncCoordinator, SyncPhase,
    SyncSummary, SyncTrigger,
};
use crate::error::SyncError;
use crate::merge::merge;
use crate::metrics::{self, FetchTimer};
use crate::storage::CacheSnapshot;
use crate::ticket::normalize::normalize_history;

impl SyncCoordinator {
    /// Run one refresh of the active session.
    ///
    /// Non-forced calls inside the throttle window are skipped. A call while
    /// another refresh of the same session is running is skipped regardless
    /// of `force`. Never returns an error: failures land in the published
    /// view and in the returned outcome.
    #[tracing::instrument(skip(self, trigger), fields(trigger = %trigger))]
    pub async fn refresh(&self, force: bool, trigger: SyncTrigger) -> RefreshOutcome {
        let outcome = self.refresh_inner(force, trigger).await;
        metrics::record_refresh(trigger.as_str(), outcome.label());
        outcome
    }

    async fn refresh_inner(&self, force: bool, trigger: SyncTrigger) -> RefreshOutcome {
        let Some(handle) = self.handle() else {
            debug!("No active session, refresh skipped");
            return RefreshOutcome::Skipped(SkipReason::NoSession);
        };

        if !force {
            let last_success = *handle.last_success.lock();
            let throttled = last_success.is_some_and(|last| last.elapsed() < self.config.throttle());
            if throttled {
                debug!(user_id = %handle.user_id, "Refresh throttled");
                return RefreshOutcome::Skipped(SkipReason::Throttled);
            }
        }

        let Some(_guard) = InFlightGuard::acquire(&handle.in_flight) else {
            debug!(user_id = %handle.user_id, "Refresh already in flight");
            return RefreshOutcome::Skipped(SkipReason::InFlight);
        };

        if !self.is_online() {
            return self.serve_offline(&handle).await;
        }

        self.view.send_modify(|v| {
            v.loading = true;
        });
        self.set_phase(SyncPhase::Loading);

        match self.fetch_and_merge(&handle).await {
            Ok(Some(summary)) => {
                info!(
                    user_id = %handle.user_id,
                    fetched = summary.fetched,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    total = summary.total,
                    "Ticket sync completed"
                );
                RefreshOutcome::Synced(summary)
            }
            Ok(None) => {
                debug!(user_id = %handle.user_id, "Session changed during fetch, response dropped");
                RefreshOutcome::Superseded
            }
            Err(e) => {
                if !self.is_current(handle.epoch) {
                    return RefreshOutcome::Superseded;
                }
                warn!(user_id = %handle.user_id, error = %e, kind = %e.kind(), "Ticket sync failed");
                metrics::record_error(e.kind().as_str());
                self.view.send_modify(|v| {
                    v.loading = false;
                    v.has_loaded = true;
                    v.error = Some(e.to_string());
                    v.error_kind = Some(e.kind());
                });
                self.set_phase(SyncPhase::Idle);
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Connectivity is down: re-read the persisted snapshot and show it.
    ///
    /// The persisted copy only replaces memory when it is newer. After a
    /// failed save the in-memory merge is ahead of storage and stays put.
    async fn serve_offline(&self, handle: &SessionHandle) -> RefreshOutcome {
        let persisted = handle.store.load_or_absent().await;

        let mut guard = self.active.lock();
        let Some(session) = guard.as_mut().filter(|s| s.handle.epoch == handle.epoch) else {
            return RefreshOutcome::Superseded;
        };
        match persisted {
            Some(snapshot) if snapshot.last_sync_timestamp > session.snapshot.last_sync_timestamp => {
                session.snapshot = snapshot;
            }
            Some(_) => {
                debug!(user_id = %handle.user_id, "Persisted snapshot is older than memory, keeping memory");
            }
            None => {}
        }
        let tickets = session.snapshot.tickets.clone();
        let last_updated = session.snapshot.last_sync_timestamp;
        metrics::set_cached_tickets(tickets.len());
        self.view.send_modify(|v| {
            v.tickets = tickets;
            v.last_updated = last_updated;
            v.loading = false;
            v.has_loaded = true;
        });
        drop(guard);
        self.set_phase(SyncPhase::Idle);

        debug!(user_id = %handle.user_id, "Offline, served persisted snapshot");
        RefreshOutcome::Offline
    }

    /// `Ok(None)` when the session changed before the result could be applied.
    async fn fetch_and_merge(&self, handle: &SessionHandle) -> Result<Option<SyncSummary>, SyncError> {
        let token = self
            .session
            .token()
            .await
            .ok_or_else(|| SyncError::Auth("no session token".to_string()))?;

        let mut timer = FetchTimer::start();
        let timeout = self.config.fetch_timeout();
        let history = tokio::time::timeout(timeout, self.source.fetch_history(&handle.user_id, &token))
            .await
            .map_err(|_| SyncError::Network(format!("request timed out after {}s", timeout.as_secs())))??;
        timer.succeed();
        drop(timer);

        if !self.is_current(handle.epoch) {
            return Ok(None);
        }

        let (incoming, report) = normalize_history(history);
        metrics::record_normalize_dropped(report.dropped);
        debug!(
            upcoming_urban = report.upcoming_urban,
            upcoming_interurban = report.upcoming_interurban,
            past_urban = report.past_urban,
            past_interurban = report.past_interurban,
            dropped = report.dropped,
            "History normalized"
        );

        let existing = {
            let guard = self.active.lock();
            match guard.as_ref().filter(|s| s.handle.epoch == handle.epoch) {
                Some(session) => session.snapshot.clone(),
                None => return Ok(None),
            }
        };

        let now = Utc::now();
        let outcome = merge(&existing, incoming, &handle.user_id, now);
        metrics::record_merge(outcome.inserted, outcome.updated, outcome.rejected);

        let mut merged = outcome.snapshot;
        let evicted = self.retention.apply(&mut merged, now);
        metrics::record_retention_evicted(evicted);

        let snapshot = self.persist_and_reload(handle, merged).await;

        let mut guard = self.active.lock();
        let Some(session) = guard.as_mut().filter(|s| s.handle.epoch == handle.epoch) else {
            return Ok(None);
        };
        session.snapshot = snapshot;
        *handle.last_success.lock() = Some(tokio::time::Instant::now());

        let tickets = session.snapshot.tickets.clone();
        let last_updated = session.snapshot.last_sync_timestamp;
        let total = tickets.len();
        metrics::set_cached_tickets(total);
        self.view.send_modify(|v| {
            v.tickets = tickets;
            v.last_updated = last_updated;
            v.loading = false;
            v.has_loaded = true;
            v.error = None;
            v.error_kind = None;
        });
        drop(guard);
        self.set_phase(SyncPhase::Idle);

        Ok(Some(SyncSummary {
            fetched: report.total(),
            inserted: outcome.inserted,
            updated: outcome.updated,
            rejected: outcome.rejected,
            evicted,
            total,
        }))
    }

    /// Save best-effort, then read back what was stored. The merged snapshot
    /// stays authoritative when either step fails.
    async fn persist_and_reload(&self, handle: &SessionHandle, merged: CacheSnapshot) -> CacheSnapshot {
        if let Err(e) = handle.store.save(&merged).await {
            warn!(user_id = %handle.user_id, error = %e, "Snapshot save failed, keeping in-memory result");
            metrics::record_persistence("save", false);
            metrics::record_error(e.kind().as_str());
            return merged;
        }
        metrics::record_persistence("save", true);

        match handle.store.load_or_absent().await {
            Some(reloaded) => reloaded,
            None => merged,
        }
    }
}
