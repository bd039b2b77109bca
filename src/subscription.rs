//! Fan-out of newly appended messages to live subscribers.
//!
//! Each subscriber supplies an unbounded delivery channel at subscribe time.
//! The channel sender is the subscriber's "post a task" primitive: enqueueing
//! never blocks the producer, and the subscribing front-end owns the receiving
//! task, which serializes deliveries for that subscriber. One slow subscriber
//! therefore cannot delay another subscriber or the producer.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::NewMessageListener;
use crate::message::{Message, MessageBatch};

/// The delivery side of a subscriber's queue.
pub type DeliverySender = mpsc::UnboundedSender<MessageBatch>;

struct SubscriberRecord {
    /// Lowest offset not yet enqueued to this subscriber.
    next_offset_needed: u64,
    sender: DeliverySender,
}

/// Tracks per-topic subscriber records and dispatches each new message to
/// every eligible subscriber.
///
/// Registered with the broker as a [`NewMessageListener`]; the broker invokes
/// [`on_new_message`](Self::on_new_message) in offset order per topic, and
/// this manager preserves that order per subscriber because each record's
/// queue is a FIFO.
///
/// The manager does not deduplicate against historical catch-up reads: a
/// subscriber that consumes history after subscribing must filter pushed
/// batches against its own high-water offset.
#[derive(Default)]
pub struct SubscriptionManager {
    /// topic → (subscriber id → record), all guarded by one mutex. The guard
    /// is held only while enqueueing, never while a delivery runs.
    subscriptions: Mutex<HashMap<String, HashMap<String, SubscriberRecord>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a subscriber for `topic`.
    ///
    /// Messages with offsets at or above `start_offset` will be enqueued to
    /// `sender` as they are produced. Subscribing again under the same id
    /// replaces the previous record.
    pub fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        start_offset: u64,
        sender: DeliverySender,
    ) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        debug!(
            topic,
            subscriber_id, start_offset, "subscriber registered"
        );
        subscriptions.entry(topic.to_string()).or_default().insert(
            subscriber_id.to_string(),
            SubscriberRecord {
                next_offset_needed: start_offset,
                sender,
            },
        );
        true
    }

    /// Remove one subscription; `true` if something was removed.
    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = subscriptions.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(subscriber_id).is_some();
        if removed {
            debug!(topic, subscriber_id, "subscriber removed");
            if subscribers.is_empty() {
                subscriptions.remove(topic);
            }
        }
        removed
    }

    /// Remove a subscriber from every topic; called when a session ends.
    pub fn unsubscribe_all(&self, subscriber_id: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions.retain(|topic, subscribers| {
            if subscribers.remove(subscriber_id).is_some() {
                debug!(topic, subscriber_id, "subscriber removed");
            }
            !subscribers.is_empty()
        });
    }

    /// Number of live subscribers for a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subscriptions.get(topic).map_or(0, HashMap::len)
    }

    fn dispatch(&self, message: &Message) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = subscriptions.get_mut(&message.topic) else {
            return;
        };

        let mut dead = Vec::new();
        for (subscriber_id, record) in subscribers.iter_mut() {
            if message.offset < record.next_offset_needed {
                continue;
            }
            let batch = MessageBatch {
                topic: message.topic.clone(),
                messages: vec![message.clone()],
            };
            if record.sender.send(batch).is_err() {
                // Receiver gone: the session died without unsubscribing.
                dead.push(subscriber_id.clone());
                continue;
            }
            record.next_offset_needed = message.offset + 1;
        }

        for subscriber_id in dead {
            warn!(
                topic = %message.topic,
                subscriber_id,
                "delivery queue closed; evicting subscriber"
            );
            subscribers.remove(&subscriber_id);
        }
        if subscribers.is_empty() {
            subscriptions.remove(&message.topic);
        }
    }
}

impl NewMessageListener for SubscriptionManager {
    fn on_new_message(&self, message: &Message) {
        self.dispatch(message);
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(topic: &str, offset: u64) -> Message {
        Message::new(offset, topic, Bytes::from(format!("m{offset}")))
    }

    #[test]
    fn test_subscribe_and_dispatch() {
        let manager = SubscriptionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(manager.subscribe("orders", "s1", 0, tx));

        manager.on_new_message(&message("orders", 0));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.topic, "orders");
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].offset, 0);
    }

    #[test]
    fn test_dispatch_skips_offsets_below_start() {
        let manager = SubscriptionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe("orders", "s1", 5, tx);

        manager.on_new_message(&message("orders", 3));
        assert!(rx.try_recv().is_err());

        manager.on_new_message(&message("orders", 5));
        assert_eq!(rx.try_recv().unwrap().messages[0].offset, 5);
    }

    #[test]
    fn test_dispatch_preserves_offset_order() {
        let manager = SubscriptionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe("orders", "s1", 0, tx);

        for offset in 0..4 {
            manager.on_new_message(&message("orders", offset));
        }
        for expected in 0..4 {
            assert_eq!(rx.try_recv().unwrap().messages[0].offset, expected);
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let manager = SubscriptionManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.subscribe("orders", "s1", 0, tx);

        assert!(manager.unsubscribe("orders", "s1"));
        assert!(!manager.unsubscribe("orders", "s1"));

        manager.on_new_message(&message("orders", 0));
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.subscriber_count("orders"), 0);
    }

    #[test]
    fn test_unsubscribe_all_spans_topics() {
        let manager = SubscriptionManager::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        manager.subscribe("orders", "session", 0, tx1);
        manager.subscribe("invoices", "session", 0, tx2);
        manager.subscribe("orders", "other", 0, tx3);

        manager.unsubscribe_all("session");

        assert_eq!(manager.subscriber_count("orders"), 1);
        assert_eq!(manager.subscriber_count("invoices"), 0);

        manager.on_new_message(&message("orders", 0));
        assert_eq!(rx3.try_recv().unwrap().messages[0].offset, 0);
    }

    #[test]
    fn test_resubscribe_replaces_record() {
        let manager = SubscriptionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.subscribe("orders", "s1", 0, tx1);
        manager.subscribe("orders", "s1", 10, tx2);
        assert_eq!(manager.subscriber_count("orders"), 1);

        manager.on_new_message(&message("orders", 4));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());

        manager.on_new_message(&message("orders", 10));
        assert_eq!(rx2.try_recv().unwrap().messages[0].offset, 10);
    }

    #[test]
    fn test_closed_channel_evicts_subscriber() {
        let manager = SubscriptionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.subscribe("orders", "s1", 0, tx);
        drop(rx);

        manager.on_new_message(&message("orders", 0));
        assert_eq!(manager.subscriber_count("orders"), 0);
    }

    #[test]
    fn test_slow_subscriber_does_not_block_others() {
        let manager = SubscriptionManager::new();
        // "slow" never drains its queue; "fast" reads everything.
        let (slow_tx, _slow_rx) = mpsc::unbounded_channel();
        let (fast_tx, mut fast_rx) = mpsc::unbounded_channel();
        manager.subscribe("orders", "slow", 0, slow_tx);
        manager.subscribe("orders", "fast", 0, fast_tx);

        for offset in 0..100 {
            manager.on_new_message(&message("orders", offset));
        }
        for expected in 0..100 {
            assert_eq!(fast_rx.try_recv().unwrap().messages[0].offset, expected);
        }
    }
}
