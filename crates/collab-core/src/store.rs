//! The `ContentStore` collaborator (spec §4.3): durable persistence of
//! schemas, append-only per-`(content_type, id)` operations, and
//! periodic snapshots.

use crate::error::Result;
use crate::ids::SchemaRef;
use crate::model::{Operation, Schema, Snapshot};
use async_trait::async_trait;

/// Durable persistence contract. Implementations must make
/// `store_operation` atomic with respect to the `(content_type, id)`
/// version sequence — the conflict-driven catch-up property (spec §4.5,
/// §9 Open Question b) depends on this.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Idempotent on `hash`; returns the canonical stored schema.
    async fn store_schema(&self, schema: Schema) -> Result<Schema>;

    /// Looks up a schema by its hash.
    async fn load_schema(&self, hash: &SchemaRef) -> Result<Option<Schema>>;

    /// Atomically appends an operation. Fails with
    /// `AlreadyExists{key="version", value=current_max}` if
    /// `op.version != current_max + 1`; fails with
    /// `AlreadyExists{key="operation_key"}` on a duplicate `key`.
    async fn store_operation(&self, op: Operation) -> Result<()>;

    /// Returns operations with `version_start <= version < version_end`,
    /// ascending by version.
    async fn load_operations(
        &self,
        content_type: &str,
        id: &str,
        version_start: u64,
        version_end: u64,
    ) -> Result<Vec<Operation>>;

    /// Idempotent on `(content_type, id, version)`; a duplicate store
    /// returns `AlreadyExists` and is not fatal to callers.
    async fn store_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Returns the snapshot with the greatest version `<= version_at_most`,
    /// or `None`.
    async fn load_snapshot(
        &self,
        content_type: &str,
        id: &str,
        version_at_most: u64,
    ) -> Result<Option<Snapshot>>;

    /// The current highest stored version for `(content_type, id)`, or 0
    /// if no operations have been stored yet.
    async fn current_max_version(&self, content_type: &str, id: &str) -> Result<u64>;
}
