// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot merge.
//!
//! Incoming tickets replace existing entries with the same id wholesale.
//! Ids missing from the batch are kept: a fetch may be partial, so only
//! explicit invalidation removes tickets.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::storage::CacheSnapshot;
use crate::ticket::{sort_tickets, Ticket};

/// Result of [`merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub snapshot: CacheSnapshot,
    /// Ids seen for the first time.
    pub inserted: usize,
    /// Ids that replaced an existing entry.
    pub updated: usize,
    /// Tickets dropped because they carry another user's id.
    pub rejected: usize,
}

/// Merge `incoming` into `existing` on behalf of `owner`.
///
/// A ticket whose embedded user id differs from `owner` is dropped and
/// counted. If `existing` belongs to another user it is not reused.
pub fn merge(
    existing: &CacheSnapshot,
    incoming: Vec<Ticket>,
    owner: &str,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let base: &[Ticket] = if existing.owner_user_id == owner {
        &existing.tickets
    } else {
        warn!(
            owner,
            previous_owner = %existing.owner_user_id,
            "Merging over a snapshot owned by another user, starting empty"
        );
        &[]
    };

    let mut by_id: HashMap<String, Ticket> = base
        .iter()
        .map(|t| (t.id.clone(), t.clone()))
        .collect();

    let (mut inserted, mut updated, mut rejected) = (0, 0, 0);

    for mut ticket in incoming {
        if ticket.user_id.as_deref().is_some_and(|uid| uid != owner) {
            rejected += 1;
            continue;
        }

        // Within one batch a repeated id counts once, against the snapshot.
        let prior_cached_at = by_id.get(&ticket.id).map(|prev| prev.sync.cached_at);
        let was_in_base = base.iter().any(|t| t.id == ticket.id);

        ticket.sync.cached_at = prior_cached_at.unwrap_or(now);
        ticket.sync.last_synced_at = now;

        match by_id.insert(ticket.id.clone(), ticket) {
            None => inserted += 1,
            Some(_) if was_in_base => updated += 1,
            Some(_) => {}
        }
    }

    let mut tickets: Vec<Ticket> = by_id.into_values().collect();
    sort_tickets(&mut tickets);

    if rejected > 0 {
        debug!(owner, rejected, "Dropped tickets owned by other users");
    }

    MergeOutcome {
        snapshot: CacheSnapshot {
            tickets,
            last_sync_timestamp: Some(now),
            owner_user_id: owner.to_string(),
            schema_version: existing.schema_version,
        },
        inserted,
        updated,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CURRENT_SCHEMA_VERSION;
    use crate::ticket::fixtures::{at, interurban, urban};
    use crate::ticket::Trip;

    fn empty(owner: &str) -> CacheSnapshot {
        CacheSnapshot::empty(owner, CURRENT_SCHEMA_VERSION)
    }

    fn departing(mut ticket: Ticket, when: &str) -> Ticket {
        match &mut ticket.trip {
            Trip::Urban(trip) => trip.departure_at = Some(at(when)),
            Trip::Interurban(trip) => trip.departure_at = Some(at(when)),
        }
        ticket
    }

    #[test]
    fn test_merge_into_empty() {
        let now = at("2026-04-01T08:00:00Z");
        let out = merge(&empty("u1"), vec![urban("t1", "BRT"), interurban("t2")], "u1", now);

        assert_eq!(out.inserted, 2);
        assert_eq!(out.updated, 0);
        assert_eq!(out.snapshot.len(), 2);
        assert_eq!(out.snapshot.last_sync_timestamp, Some(now));
        for t in &out.snapshot.tickets {
            assert_eq!(t.sync.cached_at, now);
            assert_eq!(t.sync.last_synced_at, now);
        }
    }

    #[test]
    fn test_cached_at_is_write_once() {
        let first = at("2026-04-01T08:00:00Z");
        let second = at("2026-04-01T09:00:00Z");

        let s1 = merge(&empty("u1"), vec![urban("t1", "BRT")], "u1", first).snapshot;

        let mut changed = urban("t1", "BRT");
        changed.core.server_status = Some("used".into());
        let out = merge(&s1, vec![changed], "u1", second);

        let t1 = out.snapshot.get("t1").unwrap();
        assert_eq!(t1.sync.cached_at, first);
        assert_eq!(t1.sync.last_synced_at, second);
        assert_eq!(t1.core.server_status.as_deref(), Some("used"));
        assert_eq!(out.updated, 1);
        assert_eq!(out.inserted, 0);
    }

    #[test]
    fn test_foreign_tickets_rejected() {
        let mut foreign = urban("x1", "BRT");
        foreign.user_id = Some("X".into());
        let mut own = urban("y1", "BRT");
        own.user_id = Some("Y".into());

        let out = merge(&empty("Y"), vec![foreign, own, urban("n1", "TER")], "Y", at("2026-04-01T08:00:00Z"));

        assert_eq!(out.rejected, 1);
        assert!(out.snapshot.get("x1").is_none());
        assert!(out.snapshot.get("y1").is_some());
        assert!(out.snapshot.get("n1").is_some());
    }

    #[test]
    fn test_absent_ids_are_kept() {
        let now = at("2026-04-01T08:00:00Z");
        let s1 = merge(&empty("u1"), vec![urban("t1", "BRT"), urban("t2", "BRT")], "u1", now).snapshot;
        let out = merge(&s1, vec![urban("t2", "BRT")], "u1", now + chrono::Duration::minutes(5));

        assert!(out.snapshot.get("t1").is_some());
        assert_eq!(out.snapshot.len(), 2);
    }

    #[test]
    fn test_result_is_sorted_newest_first() {
        let now = at("2026-04-01T08:00:00Z");
        let batch = vec![
            departing(urban("a", "BRT"), "2026-04-02T08:00:00Z"),
            departing(interurban("b"), "2026-06-01T08:00:00Z"),
            departing(urban("c", "TER"), "2026-03-01T08:00:00Z"),
        ];
        let out = merge(&empty("u1"), batch, "u1", now);

        let ids: Vec<_> = out.snapshot.tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let now = at("2026-04-01T08:00:00Z");
        let batch = vec![urban("t1", "BRT"), interurban("t2")];

        let once = merge(&empty("u1"), batch.clone(), "u1", now).snapshot;
        let twice = merge(&once, batch, "u1", now).snapshot;

        assert_eq!(once, twice);
    }

    #[test]
    fn test_foreign_existing_snapshot_is_not_reused() {
        let now = at("2026-04-01T08:00:00Z");
        let other = merge(&empty("u2"), vec![urban("t9", "BRT")], "u2", now).snapshot;

        let out = merge(&other, vec![urban("t1", "BRT")], "u1", now);
        assert_eq!(out.snapshot.owner_user_id, "u1");
        assert!(out.snapshot.get("t9").is_none());
    }

    #[test]
    fn test_incoming_marker_is_replaced() {
        let now = at("2026-04-01T08:00:00Z");
        let mut s1 = merge(&empty("u1"), vec![urban("t1", "BRT")], "u1", now).snapshot;
        s1.tickets[0].sync.pending_update = true;

        let out = merge(&s1, vec![urban("t1", "BRT")], "u1", now);
        assert!(!out.snapshot.get("t1").unwrap().sync.pending_update);
    }
}
