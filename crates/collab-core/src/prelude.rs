//! Convenience re-exports for downstream crates, mirroring the teacher's
//! `prelude` convention of collecting the handful of items most call
//! sites actually need.

pub use crate::content_type::{ContentType, JsonMergeContentType};
pub use crate::dispatch::{ProxyRegistry, RequestHandler, ServiceRegistry};
pub use crate::error::{CoreError, Result};
pub use crate::ids::{DocumentRef, OperationKey, RequestId, SchemaRef, MAX_VERSION, MIN_VERSION};
pub use crate::model::{hash_schema, Operation, OperationMeta, Schema, Snapshot};
pub use crate::protocol::{Frame, FrameKind, WireError};
pub use crate::pubsub::{topics, Message, PubSub, Subscription};
pub use crate::store::ContentStore;
