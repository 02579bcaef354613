//! Newtype identifiers that keep documents, schemas, and requests from
//! being confused with one another at the type level — all three are
//! otherwise plain strings or integers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The hex-encoded content hash of a [`crate::model::Schema`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRef(pub String);

impl SchemaRef {
    pub fn empty() -> Self {
        SchemaRef(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SchemaRef {
    fn from(value: String) -> Self {
        SchemaRef(value)
    }
}

impl From<&str> for SchemaRef {
    fn from(value: &str) -> Self {
        SchemaRef(value.to_owned())
    }
}

/// Globally unique key identifying one [`crate::model::Operation`],
/// independent of its `(content_type, id, version)` coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationKey(pub Uuid);

impl OperationKey {
    pub fn new() -> Self {
        OperationKey(Uuid::new_v4())
    }
}

impl Default for OperationKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The id of a document within a content type: `(content_type, id)`
/// identifies one synchronised resource per the glossary.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub content_type: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(content_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.content_type, self.id)
    }
}

/// A multiplexer request id, assigned monotonically per connection by the
/// proxy side (spec §4.1). Replies are correlated by `(service, id)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sentinel meaning "latest version" in range queries (spec §4.5).
pub const MAX_VERSION: u64 = (1u64 << 31) - 1;
/// The smallest valid version; 0 denotes the empty snapshot.
pub const MIN_VERSION: u64 = 0;
