// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optional eviction of long-expired tickets.
//!
//! By default the local snapshot is an additive archive. With a `max_age`
//! configured, a ticket becomes a victim only once it derives to
//! [`TicketStatus::Expired`] *and* no merge has touched it for `max_age`.

use chrono::{DateTime, Duration, Utc};

use crate::storage::CacheSnapshot;
use crate::ticket::status::{derive_status, TicketStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    #[must_use]
    pub fn keep_all() -> Self {
        Self { max_age: None }
    }

    #[must_use]
    pub fn from_days(days: Option<u32>) -> Self {
        Self {
            max_age: days.map(|d| Duration::days(i64::from(d))),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max_age.is_some()
    }

    /// Ids that would be evicted at `now`.
    #[must_use]
    pub fn select_victims(&self, snapshot: &CacheSnapshot, now: DateTime<Utc>) -> Vec<String> {
        let Some(max_age) = self.max_age else {
            return Vec::new();
        };
        snapshot
            .tickets
            .iter()
            .filter(|t| now - t.sync.last_synced_at > max_age)
            .filter(|t| derive_status(t, now) == TicketStatus::Expired)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Remove victims in place, returning how many were evicted.
    pub fn apply(&self, snapshot: &mut CacheSnapshot, now: DateTime<Utc>) -> usize {
        let victims = self.select_victims(snapshot, now);
        if victims.is_empty() {
            return 0;
        }
        snapshot.tickets.retain(|t| !victims.contains(&t.id));
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CURRENT_SCHEMA_VERSION;
    use crate::ticket::fixtures::{at, urban};
    use crate::ticket::Ticket;

    fn synced(id: &str, validated: &str, last_synced: &str) -> Ticket {
        let mut t = urban(id, "BRT");
        t.core.validated_at = Some(at(validated));
        t.sync.last_synced_at = at(last_synced);
        t
    }

    fn snapshot(tickets: Vec<Ticket>) -> CacheSnapshot {
        CacheSnapshot {
            tickets,
            ..CacheSnapshot::empty("u1", CURRENT_SCHEMA_VERSION)
        }
    }

    #[test]
    fn test_default_keeps_everything() {
        let mut snap = snapshot(vec![synced("old", "2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z")]);
        let policy = RetentionPolicy::default();
        assert!(!policy.is_enabled());
        assert_eq!(policy.apply(&mut snap, at("2026-04-01T00:00:00Z")), 0);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_evicts_only_old_and_expired() {
        let now = at("2026-04-01T00:00:00Z");
        let mut snap = snapshot(vec![
            // expired, untouched for months
            synced("stale", "2025-12-01T08:00:00Z", "2025-12-01T09:00:00Z"),
            // expired but seen in a recent merge
            synced("recent", "2025-12-01T08:00:00Z", "2026-03-31T00:00:00Z"),
            // untouched for months but never expires
            {
                let mut t = urban("open", "BRT");
                t.sync.last_synced_at = at("2025-12-01T09:00:00Z");
                t
            },
        ]);

        let policy = RetentionPolicy::from_days(Some(30));
        assert_eq!(policy.select_victims(&snap, now), vec!["stale".to_string()]);
        assert_eq!(policy.apply(&mut snap, now), 1);

        let ids: Vec<_> = snap.tickets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["recent", "open"]);
    }
}
