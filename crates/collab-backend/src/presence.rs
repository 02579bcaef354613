//! The thin Presence Service (spec §4.8, supplemental detail): a
//! pass-through over the [`PubSub`] bus and an injected [`PresenceStore`].
//! Grounded directly on spec.md §6's service registry table, the only
//! place a full presence signature list appears — storage internals are
//! explicitly out of scope (spec §1), so [`PresenceStore`] is minimal and
//! only an in-memory reference implementation is supplied.

use async_trait::async_trait;
use collab_core::error::Result;
use collab_core::pubsub::{topics, PubSub};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One presence record: who, where, and an opaque payload (cursor
/// position, selection, etc.) the editor client supplies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    pub session_id: String,
    pub user_id: String,
    pub location_id: String,
    pub data: Value,
}

/// Storage for presence records, keyed by session id. Out of scope per
/// spec §1 beyond this minimal contract.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn put(&self, presence: Presence) -> Result<()>;
    async fn remove(&self, session_id: &str) -> Result<()>;
    async fn by_session_id(&self, session_id: &str) -> Result<Vec<Presence>>;
    async fn by_user_id(&self, user_id: &str) -> Result<Vec<Presence>>;
    async fn by_location_id(&self, location_id: &str) -> Result<Vec<Presence>>;
}

/// In-memory reference [`PresenceStore`].
#[derive(Default)]
pub struct MemoryPresenceStore {
    by_session: DashMap<String, Presence>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn put(&self, presence: Presence) -> Result<()> {
        self.by_session.insert(presence.session_id.clone(), presence);
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<()> {
        self.by_session.remove(session_id);
        Ok(())
    }

    async fn by_session_id(&self, session_id: &str) -> Result<Vec<Presence>> {
        Ok(self.by_session.get(session_id).map(|entry| vec![entry.clone()]).unwrap_or_default())
    }

    async fn by_user_id(&self, user_id: &str) -> Result<Vec<Presence>> {
        Ok(self
            .by_session
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn by_location_id(&self, location_id: &str) -> Result<Vec<Presence>> {
        Ok(self
            .by_session
            .iter()
            .filter(|entry| entry.location_id == location_id)
            .map(|entry| entry.clone())
            .collect())
    }
}

/// `submitPresence` / `removePresence` / `getPresenceBy*` /
/// `streamPresenceBy*` over a [`PubSub`] bus and a [`PresenceStore`].
pub struct PresenceService {
    bus: Arc<dyn PubSub>,
    store: Arc<dyn PresenceStore>,
}

impl PresenceService {
    pub fn new(bus: Arc<dyn PubSub>, store: Arc<dyn PresenceStore>) -> Self {
        Self { bus, store }
    }

    pub async fn submit_presence(&self, presence: Presence) -> Result<()> {
        self.store.put(presence.clone()).await?;
        let payload = serde_json::to_value(&presence).unwrap_or(Value::Null);
        self.bus.publish(&topics::presence_session(&presence.session_id), payload.clone()).await;
        self.bus.publish(&topics::presence_user(&presence.user_id), payload.clone()).await;
        self.bus.publish(&topics::presence_location(&presence.location_id), payload).await;
        Ok(())
    }

    pub async fn remove_presence(&self, session_id: &str) -> Result<()> {
        self.store.remove(session_id).await?;
        self.bus.publish(&topics::presence_session(session_id), Value::Null).await;
        Ok(())
    }

    pub async fn get_presence_by_session_id(&self, session_id: &str) -> Result<Vec<Presence>> {
        self.store.by_session_id(session_id).await
    }

    pub async fn get_presence_by_user_id(&self, user_id: &str) -> Result<Vec<Presence>> {
        self.store.by_user_id(user_id).await
    }

    pub async fn get_presence_by_location_id(&self, location_id: &str) -> Result<Vec<Presence>> {
        self.store.by_location_id(location_id).await
    }

    /// Streams presence updates for `session_id`, lazy-loading the
    /// session's currently stored presence onto the topic the moment this
    /// subscriber is the first to arrive (spec §4.2's active/inactive
    /// signal, consumed here via [`PubSub::is_active`] rather than kept
    /// warm for sessions nobody is watching).
    pub async fn stream_presence_by_session_id(&self, session_id: &str) -> Box<dyn collab_core::pubsub::Subscription> {
        let topic = topics::presence_session(session_id);
        let became_active = !self.bus.is_active(&topic);
        let sub = self.bus.subscribe(&topic).await;
        if became_active {
            if let Ok(existing) = self.store.by_session_id(session_id).await {
                self.seed(&topic, existing).await;
            }
        }
        sub
    }

    pub async fn stream_presence_by_user_id(&self, user_id: &str) -> Box<dyn collab_core::pubsub::Subscription> {
        let topic = topics::presence_user(user_id);
        let became_active = !self.bus.is_active(&topic);
        let sub = self.bus.subscribe(&topic).await;
        if became_active {
            if let Ok(existing) = self.store.by_user_id(user_id).await {
                self.seed(&topic, existing).await;
            }
        }
        sub
    }

    pub async fn stream_presence_by_location_id(&self, location_id: &str) -> Box<dyn collab_core::pubsub::Subscription> {
        let topic = topics::presence_location(location_id);
        let became_active = !self.bus.is_active(&topic);
        let sub = self.bus.subscribe(&topic).await;
        if became_active {
            if let Ok(existing) = self.store.by_location_id(location_id).await {
                self.seed(&topic, existing).await;
            }
        }
        sub
    }

    /// Publishes each already-stored presence record onto a topic that
    /// just went active, so its first subscriber observes current state
    /// instead of only future updates.
    async fn seed(&self, topic: &str, existing: Vec<Presence>) {
        for presence in existing {
            let payload = serde_json::to_value(&presence).unwrap_or(Value::Null);
            self.bus.publish(topic, payload).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    fn presence(session: &str, user: &str, location: &str) -> Presence {
        Presence {
            session_id: session.into(),
            user_id: user.into(),
            location_id: location.into(),
            data: Value::Null,
        }
    }

    #[tokio::test]
    async fn submit_then_query_by_every_key() {
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let store: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::new());
        let service = PresenceService::new(bus, store);

        service.submit_presence(presence("s1", "u1", "doc-1")).await.unwrap();

        assert_eq!(service.get_presence_by_session_id("s1").await.unwrap().len(), 1);
        assert_eq!(service.get_presence_by_user_id("u1").await.unwrap().len(), 1);
        assert_eq!(service.get_presence_by_location_id("doc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_presence_clears_the_session_query() {
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let store: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::new());
        let service = PresenceService::new(bus, store);

        service.submit_presence(presence("s1", "u1", "doc-1")).await.unwrap();
        service.remove_presence("s1").await.unwrap();
        assert!(service.get_presence_by_session_id("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_presence_by_user_id_sees_submitted_update() {
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let store: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::new());
        let service = PresenceService::new(bus, store);

        let mut stream = service.stream_presence_by_user_id("u1").await;
        service.submit_presence(presence("s1", "u1", "doc-1")).await.unwrap();
        let message = stream.recv().await.unwrap();
        assert_eq!(message.payload["session_id"], Value::from("s1"));
    }

    #[tokio::test]
    async fn first_subscriber_lazy_loads_already_stored_presence() {
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let store: Arc<dyn PresenceStore> = Arc::new(MemoryPresenceStore::new());
        let service = PresenceService::new(bus, store);

        // Presence is submitted before anyone is watching the location
        // topic; the topic is inactive, so nothing is streamed live.
        service.submit_presence(presence("s1", "u1", "doc-1")).await.unwrap();

        // Subscribing now is the active-edge transition: the already
        // stored record must be seeded onto the stream, not just updates
        // from this point forward.
        let mut stream = service.stream_presence_by_location_id("doc-1").await;
        let message = stream.recv().await.unwrap();
        assert_eq!(message.payload["session_id"], Value::from("s1"));
    }
}
