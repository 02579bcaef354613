//! `MemoryStore`: an in-memory [`ContentStore`] reference implementation
//! (spec §4.3), used as the default in tests and as a straightforward
//! reference of the atomicity contract `storeOperation` must satisfy.

use async_trait::async_trait;
use collab_core::error::{CoreError, Result};
use collab_core::ids::SchemaRef;
use collab_core::model::{Operation, Schema, Snapshot};
use collab_core::store::ContentStore;
use parking_lot::Mutex;
use std::collections::HashMap;

type DocKey = (String, String);

#[derive(Default)]
struct Tables {
    schemas: HashMap<SchemaRef, Schema>,
    operations: HashMap<DocKey, Vec<Operation>>,
    operation_keys: std::collections::HashSet<collab_core::ids::OperationKey>,
    snapshots: HashMap<DocKey, Vec<Snapshot>>,
}

/// `Mutex`-guarded in-memory tables. `store_operation` holds the lock for
/// its whole read-check-append sequence, which is what makes it atomic
/// with respect to the `(content_type, id)` version sequence.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn store_schema(&self, schema: Schema) -> Result<Schema> {
        let mut tables = self.tables.lock();
        Ok(tables.schemas.entry(schema.hash.clone()).or_insert(schema).clone())
    }

    async fn load_schema(&self, hash: &SchemaRef) -> Result<Option<Schema>> {
        Ok(self.tables.lock().schemas.get(hash).cloned())
    }

    async fn store_operation(&self, op: Operation) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.operation_keys.contains(&op.key) {
            return Err(CoreError::already_exists("operation", "key", op.key));
        }
        let key: DocKey = (op.content_type.clone(), op.id.clone());
        let current_max = tables.operations.get(&key).map(|ops| ops.len() as u64).unwrap_or(0);
        if op.version != current_max + 1 {
            return Err(CoreError::already_exists("operation", "version", current_max));
        }
        tables.operation_keys.insert(op.key);
        tables.operations.entry(key).or_default().push(op);
        Ok(())
    }

    async fn load_operations(
        &self,
        content_type: &str,
        id: &str,
        version_start: u64,
        version_end: u64,
    ) -> Result<Vec<Operation>> {
        let tables = self.tables.lock();
        let key: DocKey = (content_type.to_owned(), id.to_owned());
        let ops = tables
            .operations
            .get(&key)
            .map(|ops| {
                ops.iter()
                    .filter(|op| op.version >= version_start && op.version < version_end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(ops)
    }

    async fn store_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut tables = self.tables.lock();
        let key: DocKey = (snapshot.content_type.clone(), snapshot.id.clone());
        let entries = tables.snapshots.entry(key).or_default();
        if entries.iter().any(|s| s.version == snapshot.version) {
            return Err(CoreError::already_exists("snapshot", "version", snapshot.version));
        }
        entries.push(snapshot);
        Ok(())
    }

    async fn load_snapshot(&self, content_type: &str, id: &str, version_at_most: u64) -> Result<Option<Snapshot>> {
        let tables = self.tables.lock();
        let key: DocKey = (content_type.to_owned(), id.to_owned());
        Ok(tables
            .snapshots
            .get(&key)
            .and_then(|entries| entries.iter().filter(|s| s.version <= version_at_most).max_by_key(|s| s.version))
            .cloned())
    }

    async fn current_max_version(&self, content_type: &str, id: &str) -> Result<u64> {
        let tables = self.tables.lock();
        let key: DocKey = (content_type.to_owned(), id.to_owned());
        Ok(tables.operations.get(&key).map(|ops| ops.len() as u64).unwrap_or(0))
    }
}
