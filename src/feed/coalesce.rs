// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debouncing of change-feed bursts.
//!
//! The [`EventCoalescer`] collects events and reports a flush as due when
//! either threshold is hit first: the debounce window measured from the
//! first pending event, or the coalesced event count.
//!
//! ```
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use ticket_sync::feed::coalesce::FlushReason;
//! use ticket_sync::feed::{ChangeEvent, ChangeOp, EventCoalescer};
//!
//! let mut coalescer = EventCoalescer::new(Duration::from_millis(150), 64);
//! let start = Instant::now();
//! let event = ChangeEvent { table: "tickets".into(), op: ChangeOp::Update, row_id: None };
//!
//! assert!(coalescer.push(&event, start).is_none());
//! assert!(!coalescer.is_due(start + Duration::from_millis(100)));
//! assert!(coalescer.is_due(start + Duration::from_millis(150)));
//! assert_eq!(coalescer.due(start + Duration::from_millis(150)), Some(FlushReason::Window));
//! assert_eq!(coalescer.take().unwrap().events, 1);
//! ```

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::ChangeEvent;

/// Why a coalesced batch was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Debounce window elapsed
    Window,
    /// Event count threshold reached
    Count,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Window => "window",
            Self::Count => "count",
        }
    }
}

/// Events folded into one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedBatch {
    pub events: usize,
    /// Distinct tables that changed.
    pub tables: Vec<String>,
}

pub struct EventCoalescer {
    window: Duration,
    max_events: usize,
    pending: usize,
    tables: BTreeSet<String>,
    first_at: Option<Instant>,
}

impl EventCoalescer {
    #[must_use]
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            window,
            max_events: max_events.max(1),
            pending: 0,
            tables: BTreeSet::new(),
            first_at: None,
        }
    }

    /// Add an event, returns [`FlushReason::Count`] if the count threshold hit.
    pub fn push(&mut self, event: &ChangeEvent, now: Instant) -> Option<FlushReason> {
        if self.first_at.is_none() {
            self.first_at = Some(now);
        }
        self.pending += 1;
        self.tables.insert(event.table.clone());

        (self.pending >= self.max_events).then_some(FlushReason::Count)
    }

    /// When the pending batch becomes due by time.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.first_at.map(|first| first + self.window)
    }

    /// Which threshold, if any, makes the pending batch due at `now`.
    #[must_use]
    pub fn due(&self, now: Instant) -> Option<FlushReason> {
        if self.pending >= self.max_events {
            Some(FlushReason::Count)
        } else if self.deadline().is_some_and(|d| now >= d) {
            Some(FlushReason::Window)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.due(now).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Take the pending batch, resetting the window.
    pub fn take(&mut self) -> Option<CoalescedBatch> {
        if self.pending == 0 {
            return None;
        }
        let batch = CoalescedBatch {
            events: std::mem::take(&mut self.pending),
            tables: std::mem::take(&mut self.tables).into_iter().collect(),
        };
        self.first_at = None;
        debug!(events = batch.events, tables = ?batch.tables, "Change events coalesced");
        Some(batch)
    }
}
