//! `collab-core`: shared domain types, error taxonomy, and protocol
//! contracts for the collaborative document backend.
//!
//! This crate defines the interfaces the rest of the workspace composes:
//! the data model (`model`), the stable error taxonomy (`error`), the
//! `ContentType`/`ContentStore`/`PubSub` collaborator traits, the
//! multiplexer's wire contract (`protocol`), and the name-keyed dispatch
//! tables the multiplexer's service/proxy registration builds on
//! (`dispatch`). Concrete implementations live in `collab-transport` and
//! `collab-backend`.

pub mod content_type;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod model;
pub mod protocol;
pub mod pubsub;
pub mod store;

pub mod prelude;
