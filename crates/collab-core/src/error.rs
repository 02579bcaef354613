//! The stable error taxonomy shared by every layer of the backend.
//!
//! Every fallible boundary in this workspace — the multiplexer, the
//! content store, the document cache, the backend orchestrator — reports
//! failures through [`CoreError`]. Entity-validation and auth failures are
//! surfaced verbatim to callers; store append conflicts are recovered via
//! catch-up publish before being surfaced; snapshot-store failures are
//! logged and swallowed; everything else bubbles through the backend's
//! `on_error` hook and aborts only the current in-flight request.

use serde_json::Value;
use std::fmt;

/// The result type used throughout the workspace.
pub type Result<T> = std::result::Result<T, CoreError>;

/// A dotted path identifying the field within an entity that failed
/// validation, e.g. `"data.version"`.
pub type FieldPath = String;

/// The stable error taxonomy (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A named entity failed schema or structural validation. Fatal to the
    /// offending request.
    #[error("invalid {entity_name}: {path}")]
    InvalidEntity {
        entity_name: &'static str,
        entity: Option<Value>,
        path: FieldPath,
    },

    /// Duplicate key on insert. Informational for conflict-driven
    /// catch-up; otherwise surfaced to the submitter.
    #[error("{entity_name} already exists: {key} = {value}")]
    AlreadyExists {
        entity_name: &'static str,
        key: String,
        value: String,
    },

    /// A referenced schema, document, or operation does not exist.
    #[error("not found: {entity_name} {key}")]
    NotFound { entity_name: &'static str, key: String },

    /// A size cap configured on the `ContentStore` boundary was exceeded.
    #[error("{entity_name} exceeds size cap ({actual} > {limit} bytes)")]
    EntityTooLarge {
        entity_name: &'static str,
        actual: usize,
        limit: usize,
    },

    /// The requested content type has no registered `ContentType`.
    #[error("unsupported content type: {content_type}")]
    TypeError { content_type: String },

    /// Authorization failure surfaced by the `auth` collaborator.
    #[error("auth failure: {reason}")]
    Auth { reason: String },

    /// The transport dropped while a request was outstanding.
    #[error("disconnected while request was outstanding")]
    Disconnected,

    /// An internal invariant was violated. Treated as a bug: surfaced and
    /// logged, never silently swallowed.
    #[error("internal invariant violated: {message}")]
    Assert { message: String },

    /// Wraps an underlying I/O or store error that doesn't map to a more
    /// specific taxonomy member.
    #[error("store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl CoreError {
    pub fn invalid_entity(entity_name: &'static str, path: impl Into<FieldPath>) -> Self {
        CoreError::InvalidEntity {
            entity_name,
            entity: None,
            path: path.into(),
        }
    }

    pub fn invalid_entity_with(
        entity_name: &'static str,
        path: impl Into<FieldPath>,
        entity: Value,
    ) -> Self {
        CoreError::InvalidEntity {
            entity_name,
            entity: Some(entity),
            path: path.into(),
        }
    }

    pub fn already_exists(
        entity_name: &'static str,
        key: impl Into<String>,
        value: impl fmt::Display,
    ) -> Self {
        CoreError::AlreadyExists {
            entity_name,
            key: key.into(),
            value: value.to_string(),
        }
    }

    pub fn not_found(entity_name: &'static str, key: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity_name,
            key: key.into(),
        }
    }

    pub fn too_large(entity_name: &'static str, actual: usize, limit: usize) -> Self {
        CoreError::EntityTooLarge {
            entity_name,
            actual,
            limit,
        }
    }

    pub fn type_error(content_type: impl Into<String>) -> Self {
        CoreError::TypeError {
            content_type: content_type.into(),
        }
    }

    pub fn assert(message: impl Into<String>) -> Self {
        CoreError::Assert {
            message: message.into(),
        }
    }

    pub fn store(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        CoreError::Store(Box::new(cause))
    }

    /// `true` for errors the spec treats as recoverable conflicts rather
    /// than terminal failures (used by the cache's catch-up path).
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CoreError::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_carries_structured_fields() {
        let err = CoreError::already_exists("operation", "version", 9u64);
        match err {
            CoreError::AlreadyExists {
                entity_name,
                key,
                value,
            } => {
                assert_eq!(entity_name, "operation");
                assert_eq!(key, "version");
                assert_eq!(value, "9");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn is_already_exists_discriminates_variant() {
        assert!(CoreError::already_exists("x", "y", 1u64).is_already_exists());
        assert!(!CoreError::not_found("x", "y").is_already_exists());
    }
}
