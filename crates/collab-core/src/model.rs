//! The data model: [`Schema`], [`Operation`], and [`Snapshot`] (spec §3).

use crate::ids::SchemaRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Describes a document type's valid content. Immutable once stored; two
/// schemas with identical `hash` are interchangeable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub content_type: String,
    pub hash: SchemaRef,
    pub data: Value,
    #[serde(default)]
    pub meta: Value,
}

impl Schema {
    /// Builds a schema, computing `hash` as a function of `(content_type,
    /// data)` only — per spec §3, `hash` must not depend on `meta`.
    pub fn new(content_type: impl Into<String>, data: Value, meta: Value) -> Self {
        let content_type = content_type.into();
        let hash = hash_schema(&content_type, &data);
        Self {
            content_type,
            hash,
            data,
            meta,
        }
    }
}

/// Computes the stable content digest over `(content_type, data)`.
pub fn hash_schema(content_type: &str, data: &Value) -> SchemaRef {
    let mut hasher = Sha256::new();
    hasher.update(content_type.as_bytes());
    hasher.update([0u8]);
    // `to_string` on a `serde_json::Value` is deterministic for a given
    // logical value only if key order is stable; `serde_json::Value` is a
    // `BTreeMap`-backed `Object` internally (unless the `preserve_order`
    // feature is enabled), so this holds for our default feature set.
    hasher.update(data.to_string().as_bytes());
    SchemaRef(hex::encode(hasher.finalize()))
}

/// User/session/time context carried on every submitted operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationMeta {
    pub user: Option<String>,
    pub session: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationMeta {
    pub fn new(user: Option<String>, session: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user,
            session,
            timestamp,
        }
    }
}

/// An atomic, version-bearing mutation on one document (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub key: crate::ids::OperationKey,
    pub content_type: String,
    pub id: String,
    pub version: u64,
    pub schema: SchemaRef,
    pub data: Value,
    pub meta: OperationMeta,
}

/// Materialised document state at a specific version. `version == 0` is
/// the empty snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub content_type: String,
    pub id: String,
    pub version: u64,
    pub schema: SchemaRef,
    pub data: Value,
    pub meta: Value,
}

impl Snapshot {
    /// The version-0 empty snapshot for a document: `data = null`,
    /// `schema = ""` (spec §8 boundary behaviour).
    pub fn empty(content_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            id: id.into(),
            version: 0,
            schema: SchemaRef::empty(),
            data: Value::Null,
            meta: Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.version == 0
    }
}
