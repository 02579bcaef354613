//! The PubSub Bus collaborator (spec §4.2): topic strings to ordered
//! delivery across all current subscribers, plus `active`/`inactive`
//! channel lifecycle signals used by presence streams to lazy-load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A message published on a topic. `payload` is opaque to the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// A live subscription handle. Dropping it unsubscribes.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Awaits and returns the next message on this topic, or `None` once
    /// the bus has shut the subscription down.
    async fn recv(&mut self) -> Option<Message>;
}

/// Topic string -> ordered delivery to all current subscribers. Delivery
/// ordering per topic is FIFO with respect to publish order from a single
/// publisher; no cross-topic ordering is guaranteed.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Subscribes to a topic, returning a handle that yields messages
    /// published after the call returns.
    async fn subscribe(&self, topic: &str) -> Box<dyn Subscription>;

    /// Publishes a message to all current subscribers of `topic`.
    async fn publish(&self, topic: &str, payload: Value);

    /// Whether `topic` currently has at least one subscriber.
    fn is_active(&self, topic: &str) -> bool;
}

/// Canonical topic names, collected in one place so the cache, the
/// backend, and the presence service agree on spelling.
pub mod topics {
    use std::fmt::Write;

    /// `operation:<content_type>:<id>` — confirmed-operation broadcast
    /// topic for one document (spec §4.5, §4.6).
    pub fn operation(content_type: &str, id: &str) -> String {
        let mut topic = String::with_capacity(10 + content_type.len() + id.len());
        write!(&mut topic, "operation:{content_type}:{id}").expect("String write is infallible");
        topic
    }

    pub fn presence_session(session_id: &str) -> String {
        format!("presence:session:{session_id}")
    }

    pub fn presence_user(user_id: &str) -> String {
        format!("presence:user:{user_id}")
    }

    pub fn presence_location(location_id: &str) -> String {
        format!("presence:location:{location_id}")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.topic, self.payload)
    }
}
