//! The Content Backend (spec §4.6): the orchestrator composing
//! `ContentType`, `ContentStore`, the [`DocumentCache`], and the
//! [`PubSub`] bus behind `registerSchema` / `getSchema` / `getSnapshot` /
//! `submitOperation` / `streamOperations`.

use crate::cache::{DocumentCache, OperationStream};
use crate::config::BackendConfig;
use collab_core::content_type::ContentType;
use collab_core::error::{CoreError, Result};
use collab_core::ids::SchemaRef;
use collab_core::model::{Operation, Schema, Snapshot};
use collab_core::pubsub::PubSub;
use collab_core::store::ContentStore;
use std::sync::Arc;
use tracing::error;

/// Hook invoked for non-fatal, logged-and-swallowed failures (snapshot
/// persistence, catch-up replay) — defaults to `tracing::warn!`.
pub type WarningHook = Arc<dyn Fn(&CoreError) + Send + Sync>;
/// Hook invoked for unexpected internal errors that abort only the
/// current in-flight request — defaults to `tracing::error!`.
pub type ErrorHook = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// The orchestrator. Constructor-injected per spec §9's anti-singleton
/// redesign flag: no ambient global state, every collaborator is passed
/// in explicitly.
pub struct ContentBackend {
    cache: Arc<DocumentCache>,
    store: Arc<dyn ContentStore>,
    content_types: std::collections::HashMap<String, Arc<dyn ContentType>>,
    config: BackendConfig,
    on_warning: WarningHook,
    on_error: ErrorHook,
}

impl ContentBackend {
    pub fn new(store: Arc<dyn ContentStore>, bus: Arc<dyn PubSub>, config: BackendConfig) -> Self {
        let cache = DocumentCache::new(Arc::clone(&store), bus, config.cache.clone());
        Self {
            cache,
            store,
            content_types: std::collections::HashMap::new(),
            config,
            on_warning: Arc::new(|err| tracing::warn!(%err, "backend warning")),
            on_error: Arc::new(|err| error!(%err, "backend error")),
        }
    }

    pub fn with_warning_hook(mut self, hook: WarningHook) -> Self {
        self.on_warning = hook;
        self
    }

    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_error = hook;
        self
    }

    /// Registers a `ContentType` implementation under `name`; both the
    /// backend's own dispatch and the cache's folding logic route through
    /// this registration.
    pub fn register_content_type(&mut self, name: impl Into<String>, content_type: Arc<dyn ContentType>) {
        let name = name.into();
        self.cache.register_content_type(name.clone(), Arc::clone(&content_type));
        self.content_types.insert(name, content_type);
    }

    /// Starts the cache's background TTL eviction sweep.
    pub fn spawn_eviction_task(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_eviction_task()
    }

    fn content_type(&self, name: &str) -> Result<Arc<dyn ContentType>> {
        self.content_types
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::type_error(name.to_owned()))
    }

    /// Validates size cap, dispatches to the `ContentType` for structural
    /// validation, then stores (idempotent on hash).
    pub async fn register_schema(&self, schema: Schema) -> Result<Schema> {
        let size = serde_json::to_vec(&schema.data).map(|bytes| bytes.len()).unwrap_or(0);
        if size > self.config.store.max_schema_size {
            return Err(CoreError::too_large("schema", size, self.config.store.max_schema_size));
        }
        let ct = self.content_type(&schema.content_type)?;
        let validated = ct.validate_schema(schema).await?;
        let stored = self.store.store_schema(validated).await?;
        ct.register_schema(stored.clone()).await?;
        Ok(stored)
    }

    /// Cache-through lookup (delegates straight to the store; schemas are
    /// immutable so there is nothing to invalidate).
    pub async fn get_schema(&self, hash: &SchemaRef) -> Result<Option<Schema>> {
        self.store.load_schema(hash).await
    }

    pub async fn get_snapshot(&self, content_type: &str, id: &str, version: u64) -> Result<Snapshot> {
        self.content_type(content_type)?;
        self.cache.get_snapshot(content_type, id, version).await
    }

    /// Submits `op`, enforcing the operation size cap before it ever
    /// reaches the cache or store.
    pub async fn submit_operation(&self, op: Operation) -> Result<()> {
        self.content_type(&op.content_type)?;
        let size = serde_json::to_vec(&op.data).map(|bytes| bytes.len()).unwrap_or(0);
        if size > self.config.store.max_operation_size {
            return Err(CoreError::too_large("operation", size, self.config.store.max_operation_size));
        }
        match self.cache.submit(op).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Err(err),
            Err(err) => {
                (self.on_error)(&err);
                Err(err)
            }
        }
    }

    pub async fn stream_operations(self: &Arc<Self>, content_type: &str, id: &str, version_start: u64, version_end: u64) -> Result<OperationStream> {
        self.content_type(content_type)?;
        Ok(self.cache.stream_operations(content_type, id, version_start, version_end).await)
    }

    pub fn warn(&self, err: &CoreError) {
        (self.on_warning)(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::memory_store::MemoryStore;
    use chrono::Utc;
    use collab_core::content_type::JsonMergeContentType;
    use collab_core::ids::OperationKey;
    use collab_core::model::OperationMeta;
    use futures::StreamExt;
    use serde_json::Value;

    fn backend() -> Arc<ContentBackend> {
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let mut backend = ContentBackend::new(store, bus, BackendConfig::default());
        backend.register_content_type("counter", Arc::new(JsonMergeContentType::new()));
        Arc::new(backend)
    }

    fn op(version: u64, data: i64) -> Operation {
        Operation {
            key: OperationKey::new(),
            content_type: "counter".into(),
            id: "doc-1".into(),
            version,
            schema: SchemaRef::empty(),
            data: Value::from(data),
            meta: OperationMeta::new(None, None, Utc::now()),
        }
    }

    #[tokio::test]
    async fn unknown_content_type_yields_type_error() {
        let backend = backend();
        let err = backend.get_snapshot("richtext", "doc-1", 0).await.unwrap_err();
        assert!(matches!(err, CoreError::TypeError { .. }));
    }

    #[tokio::test]
    async fn register_schema_round_trips_by_hash() {
        let backend = backend();
        let schema = Schema::new("counter", Value::from(1), Value::Null);
        let stored = backend.register_schema(schema.clone()).await.unwrap();
        let loaded = backend.get_schema(&stored.hash).await.unwrap().unwrap();
        assert_eq!(loaded.hash, schema.hash);
    }

    #[tokio::test]
    async fn submit_then_stream_end_to_end() {
        let backend = backend();
        for v in 1..=3u64 {
            backend.submit_operation(op(v, v as i64 * 10)).await.unwrap();
        }
        let snapshot = backend.get_snapshot("counter", "doc-1", 3).await.unwrap();
        assert_eq!(snapshot.data, Value::from(60));

        let mut stream = backend.stream_operations("counter", "doc-1", 1, 4).await.unwrap();
        let mut versions = Vec::new();
        while let Some(next) = stream.next().await {
            versions.push(next.unwrap().version);
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn oversized_operation_rejected_before_reaching_the_store() {
        let backend = backend();
        let mut big = op(1, 1);
        big.data = Value::String("x".repeat(BackendConfig::default().store.max_operation_size + 1));
        let err = backend.submit_operation(big).await.unwrap_err();
        assert!(matches!(err, CoreError::EntityTooLarge { .. }));
    }
}
