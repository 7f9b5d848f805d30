// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`ChangeFeed`].
//!
//! Embedding apps bridge their own push channel by calling
//! [`LocalChangeFeed::publish`] for every notification they receive.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

use super::{ChangeEvent, ChangeFeed, ChangeOp, FeedError, FeedTopic, SubscriptionId};

struct Subscriber {
    topic: FeedTopic,
    sink: mpsc::UnboundedSender<ChangeEvent>,
}

pub struct LocalChangeFeed {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_id: AtomicU64,
}

impl LocalChangeFeed {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Fan a change out to every matching subscription.
    ///
    /// Subscriptions whose receiver is gone are dropped. Returns the number
    /// of deliveries.
    pub fn publish(
        &self,
        table: &str,
        row_user: Option<&str>,
        op: ChangeOp,
        row_id: Option<&str>,
    ) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            if !entry.topic.matches(table, row_user) {
                continue;
            }
            let event = ChangeEvent {
                table: table.to_string(),
                op,
                row_id: row_id.map(str::to_string),
            };
            if entry.sink.send(event).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        trace!(table, delivered, "Change published");
        delivered
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(
        &self,
        topic: FeedTopic,
        sink: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<SubscriptionId, FeedError> {
        if sink.is_closed() {
            return Err(FeedError::Closed);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.insert(id, Subscriber { topic, sink });
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FeedError> {
        self.subscribers.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_honors_filters() {
        let feed = LocalChangeFeed::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        feed.subscribe(FeedTopic::tickets(), tx.clone()).await.unwrap();
        feed.subscribe(FeedTopic::bookings_for("u1"), tx).await.unwrap();

        assert_eq!(feed.publish("tickets", None, ChangeOp::Update, Some("t1")), 1);
        assert_eq!(feed.publish("bookings", Some("u2"), ChangeOp::Insert, None), 0);
        assert_eq!(feed.publish("bookings", Some("u1"), ChangeOp::Insert, Some("b1")), 1);

        assert_eq!(rx.recv().await.unwrap().row_id.as_deref(), Some("t1"));
        assert_eq!(rx.recv().await.unwrap().table, "bookings");
    }

    #[tokio::test]
    async fn test_closed_sinks_are_pruned() {
        let feed = LocalChangeFeed::new();
        let (tx, rx) = mpsc::unbounded_channel();
        feed.subscribe(FeedTopic::tickets(), tx).await.unwrap();
        drop(rx);

        assert_eq!(feed.publish("tickets", None, ChangeOp::Delete, None), 0);
        assert_eq!(feed.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let feed = LocalChangeFeed::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = feed.subscribe(FeedTopic::tickets(), tx).await.unwrap();

        feed.unsubscribe(id).await.unwrap();
        feed.unsubscribe(id).await.unwrap();
        assert_eq!(feed.subscription_count(), 0);
    }
}
