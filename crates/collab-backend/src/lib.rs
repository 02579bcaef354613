//! `collab-backend`: the PubSub bus, durable and in-memory content
//! stores, the document cache, the content backend orchestrator, and the
//! thin presence service.

pub mod backend;
pub mod bus;
pub mod cache;
pub mod config;
pub mod memory_store;
pub mod presence;
pub mod sled_store;

pub use backend::ContentBackend;
pub use bus::InProcessBus;
pub use cache::DocumentCache;
pub use config::{BackendConfig, CacheConfig, StoreConfig};
pub use memory_store::MemoryStore;
pub use presence::{Presence, PresenceService, PresenceStore};
pub use sled_store::SledStore;
