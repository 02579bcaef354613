//! `collab-transport`: the Framed RPC Multiplexer (spec §4.1) — wire
//! codec, connection state machine, request/reply correlation, service
//! and proxy registration, and the default TCP transport.

pub mod codec;
pub mod connection;
pub mod registry;
pub mod tcp;

pub use connection::{LifecycleEvent, Multiplexer};
pub use registry::{ProxyRegistration, ServiceRegistration};
