//! In-process topic pub/sub.
//!
//! Delivery is asynchronous and best-effort: `publish` fans out clones to
//! every current subscriber and returns immediately. Each subscriber has a
//! bounded mailbox; when it cannot keep up, events to it are dropped with a
//! warning. No persistence, no replay, no acks; subscribers are designed
//! idempotent. Ordering: events from a single publisher arrive in publish
//! order; interleaving across publishers is unspecified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::Event;

/// Mailbox depth per subscriber before drops start.
const MAILBOX_CAPACITY: usize = 256;

struct TopicSender {
    subscriber_id: u64,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    topics: DashMap<String, Vec<TopicSender>>,
    next_id: AtomicU64,
}

/// Clonable handle to the process-wide bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers the caller for future deliveries on `topic`.
    pub fn subscribe(&self, topic: &str) -> BusSubscription {
        self.subscribe_many(&[topic])
    }

    /// One mailbox receiving every listed topic.
    pub fn subscribe_many(&self, topics: &[&str]) -> BusSubscription {
        let subscriber_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        for topic in topics {
            self.inner
                .topics
                .entry((*topic).to_string())
                .or_default()
                .push(TopicSender {
                    subscriber_id,
                    tx: tx.clone(),
                });
        }
        BusSubscription {
            subscriber_id,
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            tx,
            rx,
            bus: self.clone(),
        }
    }

    /// Delivers a copy of `event` to every current subscriber of `topic`.
    pub fn publish(&self, topic: &str, event: Event) {
        let Some(mut senders) = self.inner.topics.get_mut(topic) else {
            return;
        };
        senders.retain(|sender| match sender.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic, subscriber = sender.subscriber_id, "bus mailbox full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn remove_subscriber(&self, subscriber_id: u64, topics: &[String]) {
        for topic in topics {
            if let Some(mut senders) = self.inner.topics.get_mut(topic) {
                senders.retain(|s| s.subscriber_id != subscriber_id);
            }
        }
    }

    /// Number of live subscribers on a topic (diagnostics and tests).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

/// Receiving end of a subscription; dropping it unsubscribes.
pub struct BusSubscription {
    subscriber_id: u64,
    topics: Vec<String>,
    tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    bus: Bus,
}

impl BusSubscription {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Routes another topic into this subscription's mailbox.
    pub fn also_subscribe(&mut self, topic: &str) {
        self.bus
            .inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(TopicSender {
                subscriber_id: self.subscriber_id,
                tx: self.tx.clone(),
            });
        self.topics.push(topic.to_string());
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.bus.remove_subscriber(self.subscriber_id, &self.topics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::topic;

    #[tokio::test]
    async fn publish_reaches_all_subscribers_in_order() {
        let bus = Bus::new();
        let mut a = bus.subscribe(&topic::team("t1"));
        let mut b = bus.subscribe(&topic::team("t1"));

        for i in 0..3 {
            bus.publish(
                &topic::team("t1"),
                Event::System {
                    message: format!("m{i}"),
                },
            );
        }
        for sub in [&mut a, &mut b] {
            for i in 0..3 {
                match sub.recv().await.unwrap() {
                    Event::System { message } => assert_eq!(message, format!("m{i}")),
                    other => panic!("unexpected event: {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = Bus::new();
        let sub = bus.subscribe("topic");
        assert_eq!(bus.subscriber_count("topic"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("topic"), 0);
    }

    #[tokio::test]
    async fn subscribe_many_funnels_topics_into_one_mailbox() {
        let bus = Bus::new();
        let mut sub = bus.subscribe_many(&["a", "b"]);
        bus.publish("a", Event::System { message: "1".into() });
        bus.publish("b", Event::System { message: "2".into() });
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = Bus::new();
        bus.publish("nobody", Event::System { message: "x".into() });
    }
}
