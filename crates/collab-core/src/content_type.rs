//! The `ContentType` collaborator (spec §4.4): pluggable operation
//! semantics the backend folds operations through. This module also
//! supplies [`JsonMergeContentType`], a reference implementation used by
//! the workspace's own tests so the backend is exercisable end-to-end
//! without depending on an external OT/CRDT algebra crate.

use crate::error::{CoreError, Result};
use crate::ids::SchemaRef;
use crate::model::{Operation, Schema, Snapshot};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::RwLock;

/// Pluggable per-content-type operation semantics.
///
/// `apply` must enforce `op.version == prior.version + 1` (or
/// `op.version == 1` when `prior` is the empty snapshot) and that
/// `op.content_type == prior.content_type`, `op.id == prior.id`. When
/// `op.schema` differs from `prior.schema`, the returned snapshot carries
/// `prior.data` unchanged and only advances `schema`; in that case
/// `op.data` must be empty (`Value::Null`) — the content-type transform
/// must not be invoked for a schema-only advance (spec §4.4, §9).
#[async_trait]
pub trait ContentType: Send + Sync {
    /// Validates a schema's structural shape for this content type,
    /// returning the (possibly normalised) schema or `InvalidEntity`.
    async fn validate_schema(&self, schema: Schema) -> Result<Schema>;

    /// Whether a schema hash has already been registered with this type.
    fn has_schema(&self, hash: &SchemaRef) -> bool;

    /// Registers a validated schema as known to this content type.
    async fn register_schema(&self, schema: Schema) -> Result<()>;

    /// Folds one operation onto a prior snapshot (or the empty snapshot)
    /// to produce the next snapshot.
    async fn apply(&self, prior: &Snapshot, op: &Operation) -> Result<Snapshot>;
}

/// Checks the version/identity preconditions shared by every `apply`
/// implementation; content types should call this before their own fold
/// logic.
pub fn check_apply_preconditions(prior: &Snapshot, op: &Operation) -> Result<()> {
    if op.content_type != prior.content_type {
        return Err(CoreError::assert(format!(
            "operation content_type {} does not match snapshot content_type {}",
            op.content_type, prior.content_type
        )));
    }
    if op.id != prior.id {
        return Err(CoreError::assert(format!(
            "operation id {} does not match snapshot id {}",
            op.id, prior.id
        )));
    }
    let expected = prior.version + 1;
    if op.version != expected {
        return Err(CoreError::assert(format!(
            "operation version {} does not immediately follow snapshot version {}",
            op.version, prior.version
        )));
    }
    Ok(())
}

/// Reference `ContentType`: schema data is an opaque bag of named numeric
/// deltas; `apply` sums each named field across operations in sequence,
/// or — on a schema-only advance — carries `data` over unchanged. This is
/// precisely the arithmetic exercised by spec §8's worked examples (E1–E3
/// submit operations whose `data` accumulates to `210`, `60`, etc.).
#[derive(Default)]
pub struct JsonMergeContentType {
    known_hashes: RwLock<HashSet<SchemaRef>>,
}

impl JsonMergeContentType {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentType for JsonMergeContentType {
    async fn validate_schema(&self, schema: Schema) -> Result<Schema> {
        if schema.content_type.is_empty() {
            return Err(CoreError::invalid_entity("schema", "content_type"));
        }
        Ok(schema)
    }

    fn has_schema(&self, hash: &SchemaRef) -> bool {
        self.known_hashes.read().unwrap().contains(hash)
    }

    async fn register_schema(&self, schema: Schema) -> Result<()> {
        self.known_hashes.write().unwrap().insert(schema.hash);
        Ok(())
    }

    async fn apply(&self, prior: &Snapshot, op: &Operation) -> Result<Snapshot> {
        check_apply_preconditions(prior, op)?;

        if op.schema != prior.schema {
            if !op.data.is_null() {
                return Err(CoreError::invalid_entity(
                    "operation",
                    "data must be empty on a schema-only advance",
                ));
            }
            return Ok(Snapshot {
                content_type: prior.content_type.clone(),
                id: prior.id.clone(),
                version: op.version,
                schema: op.schema.clone(),
                data: prior.data.clone(),
                meta: op.meta_as_value(),
            });
        }

        let data = merge_numeric(&prior.data, &op.data);
        Ok(Snapshot {
            content_type: prior.content_type.clone(),
            id: prior.id.clone(),
            version: op.version,
            schema: op.schema.clone(),
            data,
            meta: op.meta_as_value(),
        })
    }
}

impl Operation {
    fn meta_as_value(&self) -> Value {
        serde_json::to_value(&self.meta).unwrap_or(Value::Null)
    }
}

/// Sums a numeric delta `op_data` onto `prior_data`; if `prior_data` is
/// not a number, the delta replaces it (covers the first-operation case
/// where `prior_data` is `Value::Null`).
fn merge_numeric(prior_data: &Value, op_data: &Value) -> Value {
    match (prior_data.as_f64(), op_data.as_f64()) {
        (Some(prior), Some(delta)) => {
            let sum = prior + delta;
            if sum.fract() == 0.0 {
                Value::from(sum as i64)
            } else {
                Value::from(sum)
            }
        }
        _ => op_data.clone(),
    }
}
