//! The Document Cache (spec §4.5): per-`(content_type, id)` base snapshot
//! + contiguous tail of recent operations, plus the live subscriber set
//! that pins an entry from TTL eviction.
//!
//! Readers take an immutable `Arc<CacheState>` snapshot via `ArcSwap`
//! (the teacher's lock-free hot-path-read pattern), so a reader never
//! observes a torn entry while a writer is mid-update. Writes serialise
//! per entry on a `tokio::sync::Mutex` — the per-document single-writer
//! property spec §4.5 and §5 require. Concurrent cache-miss rebuilds for
//! the same document coalesce via a single-flight `Notify` table.

use crate::config::CacheConfig;
use arc_swap::ArcSwap;
use collab_core::content_type::ContentType;
use collab_core::error::{CoreError, Result};
use collab_core::model::{Operation, Snapshot};
use collab_core::pubsub::{topics, PubSub};
use collab_core::store::ContentStore;
use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

pub type OperationStream = BoxStream<'static, Result<Operation>>;

/// Immutable base + tail pair read by [`ArcSwap`] on the hot path.
#[derive(Clone)]
struct CacheState {
    base: Snapshot,
    tail: Vec<Operation>,
}

impl CacheState {
    fn head_version(&self) -> u64 {
        self.tail.last().map(|op| op.version).unwrap_or(self.base.version)
    }
}

struct CacheEntry {
    state: ArcSwap<CacheState>,
    /// The fully-folded snapshot at `state.head_version()`, cached so the
    /// retention check after a submit doesn't re-fold the tail.
    head_snapshot: ArcSwap<Snapshot>,
    write_lock: tokio::sync::Mutex<()>,
    subscribers: std::sync::atomic::AtomicUsize,
    last_access: parking_lot::Mutex<Instant>,
}

impl CacheEntry {
    fn empty(content_type: &str, id: &str) -> Self {
        let base = Snapshot::empty(content_type, id);
        Self {
            state: ArcSwap::from_pointee(CacheState {
                base: base.clone(),
                tail: Vec::new(),
            }),
            head_snapshot: ArcSwap::from_pointee(base),
            write_lock: tokio::sync::Mutex::new(()),
            subscribers: std::sync::atomic::AtomicUsize::new(0),
            last_access: parking_lot::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn is_pinned(&self) -> bool {
        self.subscribers.load(std::sync::atomic::Ordering::SeqCst) > 0
    }

    fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }
}

type DocKey = (String, String);

/// The Document Cache: `getSnapshot`, `submit`, `streamOperations` plus
/// the retention and TTL-eviction policies of spec §4.5.
pub struct DocumentCache {
    entries: DashMap<DocKey, Arc<CacheEntry>>,
    content_types: DashMap<String, Arc<dyn ContentType>>,
    store: Arc<dyn ContentStore>,
    bus: Arc<dyn PubSub>,
    config: CacheConfig,
    inflight_rebuild: DashMap<DocKey, Arc<Notify>>,
}

impl DocumentCache {
    pub fn new(store: Arc<dyn ContentStore>, bus: Arc<dyn PubSub>, config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            content_types: DashMap::new(),
            store,
            bus,
            config,
            inflight_rebuild: DashMap::new(),
        })
    }

    pub fn register_content_type(&self, name: impl Into<String>, content_type: Arc<dyn ContentType>) {
        self.content_types.insert(name.into(), content_type);
    }

    fn content_type(&self, name: &str) -> Result<Arc<dyn ContentType>> {
        self.content_types
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::type_error(name.to_owned()))
    }

    fn entry(&self, content_type: &str, id: &str) -> Arc<CacheEntry> {
        Arc::clone(
            self.entries
                .entry((content_type.to_owned(), id.to_owned()))
                .or_insert_with(|| Arc::new(CacheEntry::empty(content_type, id)))
                .value(),
        )
    }

    async fn fold_to_version(&self, state: &CacheState, content_type: &str, at_most_version: u64) -> Result<Snapshot> {
        if at_most_version <= state.base.version {
            return Ok(state.base.clone());
        }
        let ct = self.content_type(content_type)?;
        let mut snap = state.base.clone();
        for op in state.tail.iter().take_while(|op| op.version <= at_most_version) {
            snap = ct.apply(&snap, op).await?;
        }
        Ok(snap)
    }

    /// Returns the snapshot at version `at_most_version`, rebuilding from
    /// the store (and promoting the result into the cache) on a miss.
    pub async fn get_snapshot(&self, content_type: &str, id: &str, at_most_version: u64) -> Result<Snapshot> {
        let entry = self.entry(content_type, id);
        entry.touch();

        loop {
            let state = entry.state.load_full();
            let head = state.head_version();
            if state.base.version <= at_most_version && at_most_version <= head {
                return self.fold_to_version(&state, content_type, at_most_version).await;
            }

            let key = (content_type.to_owned(), id.to_owned());
            let notify = match self.inflight_rebuild.entry(key.clone()) {
                DashEntry::Occupied(occ) => Some(Arc::clone(occ.get())),
                DashEntry::Vacant(vac) => {
                    let notify = Arc::new(Notify::new());
                    vac.insert(Arc::clone(&notify));
                    None
                }
            };

            if let Some(notify) = notify {
                notify.notified().await;
                continue;
            }

            debug!(content_type, id, at_most_version, "cache miss, rebuilding from store");
            let result = self.rebuild_snapshot(content_type, id, at_most_version).await;
            if let Ok(ref snapshot) = result {
                if snapshot.version > head {
                    entry.state.store(Arc::new(CacheState {
                        base: snapshot.clone(),
                        tail: Vec::new(),
                    }));
                    entry.head_snapshot.store(Arc::new(snapshot.clone()));
                }
            }
            if let Some((_, notify)) = self.inflight_rebuild.remove(&key) {
                notify.notify_waiters();
            }
            return result;
        }
    }

    async fn rebuild_snapshot(&self, content_type: &str, id: &str, at_most_version: u64) -> Result<Snapshot> {
        let ct = self.content_type(content_type)?;
        let base = self
            .store
            .load_snapshot(content_type, id, at_most_version)
            .await?
            .unwrap_or_else(|| Snapshot::empty(content_type, id));
        let ops = self.store.load_operations(content_type, id, base.version + 1, at_most_version + 1).await?;
        let mut snap = base;
        for op in ops {
            snap = ct.apply(&snap, &op).await?;
        }
        Ok(snap)
    }

    /// Submits `op`: validates against the cache's known head, appends to
    /// the store, and on success extends the tail, publishes, and runs
    /// the retention predicate. On a version conflict with the store,
    /// replays the missing operations into the cache and onto the bus
    /// before returning the conflict error (the "conflict-driven
    /// catch-up" property).
    pub async fn submit(&self, op: Operation) -> Result<()> {
        let entry = self.entry(&op.content_type, &op.id);
        entry.touch();
        let _guard = entry.write_lock.lock().await;

        match self.store.store_operation(op.clone()).await {
            Ok(()) => {
                self.advance_tail_with_op(&entry, &op).await?;
                self.bus
                    .publish(&topics::operation(&op.content_type, &op.id), operation_payload(&op))
                    .await;
                self.maybe_store_snapshot(&entry, &op.content_type).await;
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                if let Err(catch_up_err) = self.catch_up(&entry, &op.content_type, &op.id).await {
                    warn!(%catch_up_err, "catch-up after conflicting submit failed");
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn advance_tail_with_op(&self, entry: &Arc<CacheEntry>, op: &Operation) -> Result<()> {
        let state = entry.state.load_full();
        let ct = self.content_type(&op.content_type)?;
        let head = self.fold_to_version(&state, &op.content_type, state.head_version()).await?;
        let new_head_snapshot = ct.apply(&head, op).await?;

        let mut new_tail = state.tail.clone();
        new_tail.push(op.clone());
        let mut new_base = state.base.clone();
        while new_tail.len() > self.config.tail_limit {
            let oldest = new_tail.remove(0);
            new_base = ct.apply(&new_base, &oldest).await?;
        }

        entry.state.store(Arc::new(CacheState {
            base: new_base,
            tail: new_tail,
        }));
        entry.head_snapshot.store(Arc::new(new_head_snapshot));
        Ok(())
    }

    async fn catch_up(&self, entry: &Arc<CacheEntry>, content_type: &str, id: &str) -> Result<()> {
        let current_max = self.store.current_max_version(content_type, id).await?;
        let from = entry.state.load_full().head_version();
        if current_max <= from {
            return Ok(());
        }
        let ops = self.store.load_operations(content_type, id, from + 1, current_max + 1).await?;
        for op in ops {
            self.advance_tail_with_op(entry, &op).await?;
            self.bus.publish(&topics::operation(content_type, id), operation_payload(&op)).await;
            self.maybe_store_snapshot(entry, content_type).await;
        }
        Ok(())
    }

    async fn maybe_store_snapshot(&self, entry: &Arc<CacheEntry>, content_type: &str) {
        let _ = content_type;
        let snapshot = entry.head_snapshot.load_full();
        if (self.config.should_store_snapshot)(snapshot.version) {
            if let Err(err) = self.store.store_snapshot((*snapshot).clone()).await {
                if !err.is_already_exists() {
                    warn!(%err, version = snapshot.version, "snapshot persistence failed, in-memory snapshot stays valid");
                }
            }
        }
    }

    /// Streams confirmed operations in `[version_start, version_end)`,
    /// draining already-known history from cache/store first, then
    /// following the bus until `version_end - 1` is delivered or the
    /// consumer drops the stream. Subscribing pins the entry against TTL
    /// eviction for the stream's lifetime.
    pub async fn stream_operations(self: &Arc<Self>, content_type: &str, id: &str, version_start: u64, version_end: u64) -> OperationStream {
        if version_start >= version_end {
            return Box::pin(futures::stream::empty());
        }

        let entry = self.entry(content_type, id);
        entry.touch();
        entry.subscribers.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        // Subscribe before reading the tail so no operation published
        // between the read and the subscribe call is missed.
        let mut bus_sub = self.bus.subscribe(&topics::operation(content_type, id)).await;
        let state = entry.state.load_full();

        let cache = Arc::clone(self);
        let content_type = content_type.to_owned();
        let id = id.to_owned();
        let entry_for_task = Arc::clone(&entry);

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Operation>>(64);
        tokio::spawn(async move {
            let mut last_emitted = version_start.saturating_sub(1);

            let store_range_end = version_end.min(state.base.version + 1);
            if version_start < store_range_end {
                match cache.store.load_operations(&content_type, &id, version_start, store_range_end).await {
                    Ok(ops) => {
                        for op in ops {
                            last_emitted = op.version;
                            if tx.send(Ok(op)).await.is_err() {
                                entry_for_task.subscribers.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        entry_for_task.subscribers.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                        return;
                    }
                }
            }

            for op in state.tail.iter() {
                if op.version > last_emitted && op.version < version_end {
                    last_emitted = op.version;
                    if tx.send(Ok(op.clone())).await.is_err() {
                        entry_for_task.subscribers.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                        return;
                    }
                }
            }

            while last_emitted < version_end - 1 {
                match bus_sub.recv().await {
                    Some(message) => {
                        let op: Operation = match serde_json::from_value(message.payload) {
                            Ok(op) => op,
                            Err(_) => continue,
                        };
                        if op.version <= last_emitted || op.version >= version_end {
                            continue;
                        }
                        last_emitted = op.version;
                        if tx.send(Ok(op)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            entry_for_task.subscribers.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }))
    }

    /// Spawns the TTL eviction sweep. Runs until the returned handle is
    /// dropped or aborted.
    pub fn spawn_eviction_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.config.eviction_tick);
            loop {
                ticker.tick().await;
                cache.sweep_expired_entries();
            }
        })
    }

    fn sweep_expired_entries(&self) {
        let ttl = self.config.ttl;
        self.entries.retain(|_, entry| entry.is_pinned() || entry.idle_for() < ttl);
    }
}

fn operation_payload(op: &Operation) -> Value {
    serde_json::to_value(op).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::bus::InProcessBus;
    use chrono::Utc;
    use collab_core::content_type::JsonMergeContentType;
    use collab_core::ids::OperationKey;
    use collab_core::ids::SchemaRef;
    use collab_core::model::OperationMeta;
    use futures::StreamExt;

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

    fn test_cache() -> Arc<DocumentCache> {
        let store: Arc<dyn ContentStore> = Arc::new(MemoryStore::new());
        let bus: Arc<dyn PubSub> = Arc::new(InProcessBus::new());
        let cache = DocumentCache::new(store, bus, CacheConfig::default());
        cache.register_content_type("counter", Arc::new(JsonMergeContentType::new()));
        cache
    }

    #[tokio::test]
    async fn linear_submits_accumulate_and_snapshot_matches_e1() {
        let cache = test_cache();
        for (v, d) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50), (6, 60)] {
            cache.submit(op(v, d)).await.unwrap();
        }
        let latest = cache.get_snapshot("counter", "doc-1", collab_core::ids::MAX_VERSION).await.unwrap();
        assert_eq!(latest.data, Value::from(210));
        let at3 = cache.get_snapshot("counter", "doc-1", 3).await.unwrap();
        assert_eq!(at3.data, Value::from(60));
        let at0 = cache.get_snapshot("counter", "doc-1", 0).await.unwrap();
        assert_eq!(at0.data, Value::Null);
    }

    #[tokio::test]
    async fn subscriber_on_range_receives_exactly_its_window() {
        let cache = test_cache();
        let mut stream = cache.stream_operations("counter", "doc-1", 2, 5).await;
        for (v, d) in [(1, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
            cache.submit(op(v, d)).await.unwrap();
        }
        let mut versions = Vec::new();
        while let Some(next) = tokio::time::timeout(Duration::from_millis(200), stream.next()).await.ok().flatten() {
            versions.push(next.unwrap().version);
            if versions.len() == 3 {
                break;
            }
        }
        assert_eq!(versions, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_range_stream_ends_immediately() {
        let cache = test_cache();
        let mut stream = cache.stream_operations("counter", "doc-1", 5, 5).await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn conflicting_submit_triggers_catch_up_publish() {
        let cache = test_cache();
        for v in 1..=6u64 {
            cache.submit(op(v, v as i64 * 10)).await.unwrap();
        }
        let mut stream = cache.stream_operations("counter", "doc-1", 5, u64::MAX).await;
        assert_eq!(stream.next().await.unwrap().unwrap().version, 5);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 6);

        // another actor stores 7..9 directly against the store, bypassing the cache
        cache.store.store_operation(op(7, 70)).await.unwrap();
        cache.store.store_operation(op(8, 80)).await.unwrap();
        cache.store.store_operation(op(9, 90)).await.unwrap();

        let err = cache.submit(op(7, 700)).await.unwrap_err();
        assert!(err.is_already_exists());

        assert_eq!(stream.next().await.unwrap().unwrap().version, 7);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 8);
        assert_eq!(stream.next().await.unwrap().unwrap().version, 9);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn cache_miss_rebuild_is_logged() {
        let cache = test_cache();
        cache.submit(op(1, 10)).await.unwrap();

        // Evict the warm entry so the next read is a genuine cache miss.
        cache.entries.clear();

        cache.get_snapshot("counter", "doc-1", collab_core::ids::MAX_VERSION).await.unwrap();
        assert!(logs_contain("cache miss, rebuilding from store"));
    }
}
