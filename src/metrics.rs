// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the ticket sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding app is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `ticket_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `trigger`: connectivity, foreground, feed, periodic, user_pull, start
//! - `outcome`: synced, offline, failed, skipped, superseded
//! - `kind`: network, auth, cache_read, cache_write, subscription
//! - `reason`: window, count

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a refresh attempt and how it ended
pub fn record_refresh(trigger: &str, outcome: &str) {
    counter!(
        "ticket_sync_refresh_total",
        "trigger" => trigger.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record remote fetch latency
pub fn record_fetch_latency(duration: Duration, success: bool) {
    let status = if success { "success" } else { "failure" };
    histogram!(
        "ticket_sync_fetch_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());
}

/// Record the result of one merge
pub fn record_merge(inserted: usize, updated: usize, rejected: usize) {
    counter!("ticket_sync_merge_inserted_total").increment(inserted as u64);
    counter!("ticket_sync_merge_updated_total").increment(updated as u64);
    if rejected > 0 {
        counter!("ticket_sync_ownership_rejected_total").increment(rejected as u64);
    }
}

/// Record entries dropped during normalization (no id)
pub fn record_normalize_dropped(count: usize) {
    if count > 0 {
        counter!("ticket_sync_normalize_dropped_total").increment(count as u64);
    }
}

/// Record tickets evicted by the retention policy
pub fn record_retention_evicted(count: usize) {
    if count > 0 {
        counter!("ticket_sync_retention_evicted_total").increment(count as u64);
    }
}

/// Record a snapshot load or save
pub fn record_persistence(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "ticket_sync_persistence_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a persisted snapshot discarded on load
pub fn record_cache_discarded(reason: &str) {
    counter!(
        "ticket_sync_cache_discarded_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Set number of tickets currently shown
pub fn set_cached_tickets(count: usize) {
    gauge!("ticket_sync_cached_tickets").set(count as f64);
}

/// Record a change-feed event
pub fn record_feed_event(stream: &str) {
    counter!(
        "ticket_sync_feed_events_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a coalesced batch of change-feed events turned into one refresh
pub fn record_feed_flush(coalesced: usize, reason: &'static str) {
    histogram!(
        "ticket_sync_feed_coalesced",
        "reason" => reason
    )
    .record(coalesced as f64);
}

/// Record a categorized error
pub fn record_error(kind: &str) {
    counter!(
        "ticket_sync_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a coordinator phase transition
pub fn set_phase(phase: &str) {
    counter!(
        "ticket_sync_phase_transitions_total",
        "phase" => phase.to_string()
    )
    .increment(1);
}

/// A timing guard that records fetch latency on drop.
///
/// Counts as a failure unless [`FetchTimer::succeed`] was called.
pub struct FetchTimer {
    start: Instant,
    success: bool,
}

impl FetchTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            success: false,
        }
    }

    pub fn succeed(&mut self) {
        self.success = true;
    }
}

impl Drop for FetchTimer {
    fn drop(&mut self) {
        record_fetch_latency(self.start.elapsed(), self.success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_record_refresh() {
        record_refresh("user_pull", "synced");
        record_refresh("periodic", "skipped");
        record_refresh("feed", "failed");
    }

    #[test]
    fn test_merge_and_retention() {
        record_merge(3, 1, 0);
        record_merge(0, 0, 2);
        record_normalize_dropped(1);
        record_retention_evicted(0);
    }

    #[test]
    fn test_persistence_and_gauges() {
        record_persistence("load", true);
        record_persistence("save", false);
        record_cache_discarded("schema_mismatch");
        set_cached_tickets(12);
    }

    #[test]
    fn test_feed_and_errors() {
        record_feed_event("tickets");
        record_feed_flush(4, "window");
        record_error("network");
        set_phase("Loading");
    }

    #[test]
    fn test_fetch_timer() {
        {
            let mut timer = FetchTimer::start();
            std::thread::sleep(Duration::from_micros(10));
            timer.succeed();
        }
        let _failed = FetchTimer::start();
    }
}
