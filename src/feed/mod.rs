// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push notifications of backing-data changes.
//!
//! Events carry no ticket state, only the fact that something changed. The
//! coordinator consumes them from a typed queue and coalesces bursts into a
//! single refresh (see [`coalesce::EventCoalescer`]).
//!
//! Two streams are watched per session:
//!
//! | Stream     | Table      | Filter               |
//! |------------|------------|----------------------|
//! | ticket     | `tickets`  | none                 |
//! | booking    | `bookings` | `user_id=eq.{user}`  |

pub mod coalesce;
pub mod local;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::metrics;

pub use coalesce::EventCoalescer;
pub use local::LocalChangeFeed;

pub const TICKETS_TABLE: &str = "tickets";
pub const BOOKINGS_TABLE: &str = "bookings";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Subscribe to '{table}' failed: {reason}")]
    Subscribe { table: String, reason: String },
    #[error("Unsubscribe failed: {0}")]
    Unsubscribe(String),
    #[error("Change feed closed")]
    Closed,
}

/// A table plus optional row filter (`column=eq.value`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedTopic {
    pub table: String,
    pub filter: Option<String>,
}

impl FeedTopic {
    /// Unscoped ticket-state stream.
    #[must_use]
    pub fn tickets() -> Self {
        Self {
            table: TICKETS_TABLE.to_string(),
            filter: None,
        }
    }

    /// Booking stream scoped to one user.
    #[must_use]
    pub fn bookings_for(user_id: &str) -> Self {
        Self {
            table: BOOKINGS_TABLE.to_string(),
            filter: Some(format!("user_id=eq.{}", user_id)),
        }
    }

    /// Whether a change on `table` for a row owned by `row_user` matches.
    #[must_use]
    pub fn matches(&self, table: &str, row_user: Option<&str>) -> bool {
        if self.table != table {
            return false;
        }
        match self.filter.as_deref().and_then(|f| f.strip_prefix("user_id=eq.")) {
            Some(expected) => row_user == Some(expected),
            None => self.filter.is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub row_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Row-level change notifications. Delivery is at-least-once and unordered.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        topic: FeedTopic,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionId, FeedError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FeedError>;
}

struct ActivePair {
    user_id: String,
    session: u64,
    ids: Vec<SubscriptionId>,
}

/// Owns at most one subscription pair at a time.
///
/// Pairs are tagged with the session that requested them. When two
/// subscribes overlap, the higher session keeps its pair and the other is
/// released.
pub struct ChangeFeedAdapter {
    feed: Arc<dyn ChangeFeed>,
    active: Mutex<Option<ActivePair>>,
}

impl ChangeFeedAdapter {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            active: Mutex::new(None),
        }
    }

    /// Subscribe both streams for `user_id` on behalf of `session`,
    /// replacing any pair held by an older session.
    ///
    /// A stream that subscribed successfully stays active even when the other
    /// one failed; the failure is returned as [`SyncError::Subscription`].
    pub async fn subscribe(
        &self,
        user_id: &str,
        session: u64,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<(), SyncError> {
        let mut ids = Vec::with_capacity(2);
        let mut failures = Vec::new();

        for topic in [FeedTopic::tickets(), FeedTopic::bookings_for(user_id)] {
            let table = topic.table.clone();
            match self.feed.subscribe(topic, sink.clone()).await {
                Ok(id) => {
                    debug!(user_id, table = %table, subscription = id.0, "Change feed subscribed");
                    ids.push(id);
                }
                Err(e) => {
                    warn!(user_id, table = %table, error = %e, "Change feed subscription failed");
                    failures.push(e.to_string());
                }
            }
        }

        let active_streams = ids.len();
        let pair = ActivePair {
            user_id: user_id.to_string(),
            session,
            ids,
        };
        let displaced = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.session > session => {
                    debug!(user_id, session, newer = current.session, "Newer session owns the feed");
                    Some(pair)
                }
                _ => active.replace(pair),
            }
        };
        if let Some(stale) = displaced {
            self.close(stale).await;
        }

        if failures.is_empty() {
            info!(user_id, "Change feed active");
            Ok(())
        } else {
            metrics::record_error("subscription");
            Err(SyncError::Subscription(format!(
                "{} of 2 streams active: {}",
                active_streams,
                failures.join("; ")
            )))
        }
    }

    /// Drop the active pair, if any. Failures are logged only.
    pub async fn unsubscribe(&self) {
        let pair = self.active.lock().take();
        if let Some(pair) = pair {
            self.close(pair).await;
        }
    }

    /// Drop the active pair only if `session` owns it.
    pub async fn release(&self, session: u64) {
        let pair = {
            let mut active = self.active.lock();
            if active.as_ref().is_some_and(|p| p.session == session) {
                active.take()
            } else {
                None
            }
        };
        if let Some(pair) = pair {
            self.close(pair).await;
        }
    }

    async fn close(&self, pair: ActivePair) {
        for id in pair.ids {
            if let Err(e) = self.feed.unsubscribe(id).await {
                warn!(user_id = %pair.user_id, subscription = id.0, error = %e, "Change feed unsubscribe failed");
            }
        }
        debug!(user_id = %pair.user_id, session = pair.session, "Change feed torn down");
    }

    /// Number of streams currently subscribed.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.active.lock().as_ref().map_or(0, |p| p.ids.len())
    }

    /// User the active pair belongs to.
    #[must_use]
    pub fn active_user(&self) -> Option<String> {
        self.active.lock().as_ref().map(|p| p.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Refuses one table, delegates everything else.
    struct RefusingFeed {
        inner: LocalChangeFeed,
        refuse: &'static str,
    }

    #[async_trait]
    impl ChangeFeed for RefusingFeed {
        async fn subscribe(
            &self,
            topic: FeedTopic,
            sink: mpsc::UnboundedSender<ChangeEvent>,
        ) -> Result<SubscriptionId, FeedError> {
            if topic.table == self.refuse {
                return Err(FeedError::Subscribe {
                    table: topic.table,
                    reason: "channel error".into(),
                });
            }
            self.inner.subscribe(topic, sink).await
        }

        async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FeedError> {
            self.inner.unsubscribe(id).await
        }
    }

    #[test]
    fn test_topic_matching() {
        let tickets = FeedTopic::tickets();
        assert!(tickets.matches("tickets", None));
        assert!(tickets.matches("tickets", Some("anyone")));
        assert!(!tickets.matches("bookings", Some("u1")));

        let bookings = FeedTopic::bookings_for("u1");
        assert!(bookings.matches("bookings", Some("u1")));
        assert!(!bookings.matches("bookings", Some("u2")));
        assert!(!bookings.matches("bookings", None));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_pair() {
        let feed = Arc::new(LocalChangeFeed::new());
        let adapter = ChangeFeedAdapter::new(feed.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        adapter.subscribe("u1", 1, tx.clone()).await.unwrap();
        assert_eq!(feed.subscription_count(), 2);

        adapter.subscribe("u2", 2, tx).await.unwrap();
        assert_eq!(feed.subscription_count(), 2);
        assert_eq!(adapter.active_user().as_deref(), Some("u2"));

        adapter.unsubscribe().await;
        assert_eq!(feed.subscription_count(), 0);
        assert_eq!(adapter.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_working_stream() {
        let feed = Arc::new(RefusingFeed {
            inner: LocalChangeFeed::new(),
            refuse: BOOKINGS_TABLE,
        });
        let adapter = ChangeFeedAdapter::new(feed.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = adapter.subscribe("u1", 1, tx).await.unwrap_err();
        assert!(matches!(err, SyncError::Subscription(_)));
        assert_eq!(adapter.active_streams(), 1);

        feed.inner.publish(TICKETS_TABLE, None, ChangeOp::Update, Some("t1"));
        assert_eq!(rx.recv().await.unwrap().table, TICKETS_TABLE);
    }

    #[tokio::test]
    async fn test_older_session_cannot_displace_newer() {
        let feed = Arc::new(LocalChangeFeed::new());
        let adapter = ChangeFeedAdapter::new(feed.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        adapter.subscribe("u2", 5, tx.clone()).await.unwrap();
        adapter.subscribe("u1", 4, tx).await.unwrap();

        assert_eq!(adapter.active_user().as_deref(), Some("u2"));
        assert_eq!(feed.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_release_only_drops_own_session() {
        let feed = Arc::new(LocalChangeFeed::new());
        let adapter = ChangeFeedAdapter::new(feed.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        adapter.subscribe("u1", 3, tx).await.unwrap();
        adapter.release(2).await;
        assert_eq!(feed.subscription_count(), 2);

        adapter.release(3).await;
        assert_eq!(feed.subscription_count(), 0);
        assert!(adapter.active_user().is_none());
    }
}
