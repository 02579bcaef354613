//! `InProcessBus`: the default [`PubSub`] implementation (spec §4.2).
//! Topic string keyed in a `DashMap` of per-subscriber bounded channels
//! (the teacher's `dashmap` dependency, generalised from a name-keyed
//! registry to a name-keyed channel table). Each subscriber gets its own
//! bounded `mpsc` channel rather than sharing one `broadcast` receiver:
//! `publish` awaits every subscriber's send in turn, so a slow consumer
//! applies real backpressure to the publisher instead of silently
//! dropping messages once it falls behind (spec §5's "pauses delivery,
//! does not drop"; a shared `broadcast::Receiver` cannot make that
//! guarantee once `RecvError::Lagged` fires).

use async_trait::async_trait;
use collab_core::pubsub::{Message, PubSub, Subscription};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

struct Topic {
    subscribers: DashMap<u64, mpsc::Sender<Message>>,
    next_subscriber_id: AtomicU64,
    active_count: AtomicUsize,
}

/// In-process pub/sub bus. A `Redis`-backed implementation could satisfy
/// the same [`PubSub`] trait without the backend knowing the difference
/// (spec §4.2); not built here since no Non-goal requires it.
#[derive(Default)]
pub struct InProcessBus {
    topics: DashMap<String, Arc<Topic>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(name.to_owned())
                .or_insert_with(|| {
                    Arc::new(Topic {
                        subscribers: DashMap::new(),
                        next_subscriber_id: AtomicU64::new(0),
                        active_count: AtomicUsize::new(0),
                    })
                })
                .value(),
        )
    }
}

struct BusSubscription {
    topic: Arc<Topic>,
    id: u64,
    receiver: mpsc::Receiver<Message>,
}

#[async_trait]
impl Subscription for BusSubscription {
    async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.topic.subscribers.remove(&self.id);
        let remaining = self.topic.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            trace!("topic went inactive");
        }
    }
}

#[async_trait]
impl PubSub for InProcessBus {
    async fn subscribe(&self, topic: &str) -> Box<dyn Subscription> {
        let topic_handle = self.topic(topic);
        let id = topic_handle.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        topic_handle.subscribers.insert(id, sender);

        let previous = topic_handle.active_count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            trace!("topic went active");
        }

        Box::new(BusSubscription {
            topic: topic_handle,
            id,
            receiver,
        })
    }

    async fn publish(&self, topic: &str, payload: Value) {
        let topic_handle = self.topic(topic);
        let message = Message::new(topic, payload);

        // Snapshot the current subscriber senders before awaiting any of
        // them, so a concurrent subscribe/unsubscribe on this topic never
        // blocks behind a slow send held under the map's shard lock.
        let senders: Vec<(u64, mpsc::Sender<Message>)> = topic_handle
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        // No subscribers is not an error: a publish with zero receivers
        // is dropped, matching the teacher's fire-and-forget broadcast
        // convention. Each send below awaits the subscriber's channel,
        // pausing this publish until that subscriber drains rather than
        // dropping the message out from under it.
        for (id, sender) in senders {
            if sender.send(message.clone()).await.is_err() {
                topic_handle.subscribers.remove(&id);
            }
        }
    }

    fn is_active(&self, topic: &str) -> bool {
        self.topics
            .get(topic)
            .map(|entry| entry.active_count.load(Ordering::SeqCst) > 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("operation:counter:doc-1").await;
        bus.publish("operation:counter:doc-1", Value::from(1)).await;
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, Value::from(1));
    }

    #[tokio::test]
    async fn is_active_reflects_subscriber_presence() {
        let bus = InProcessBus::new();
        assert!(!bus.is_active("topic"));
        let sub = bus.subscribe("topic").await;
        assert!(bus.is_active("topic"));
        drop(sub);
        assert!(!bus.is_active("topic"));
    }

    #[tokio::test]
    async fn slow_subscriber_pauses_publish_instead_of_dropping() {
        let bus = Arc::new(InProcessBus::new());
        let mut sub = bus.subscribe("topic").await;

        // Fill the subscriber's channel past capacity from a background
        // task; publish must block on the last one rather than drop it.
        let publisher = Arc::clone(&bus);
        let filler = tokio::spawn(async move {
            for i in 0..(CHANNEL_CAPACITY as i64 + 1) {
                publisher.publish("topic", Value::from(i)).await;
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!filler.is_finished(), "publish should be paused on the full channel, not dropping");

        // Draining lets the publisher make progress again; every value
        // from 0 must still arrive, in order, with none skipped.
        for expected in 0..(CHANNEL_CAPACITY as i64 + 1) {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.payload, Value::from(expected));
        }
        filler.await.unwrap();
    }
}
