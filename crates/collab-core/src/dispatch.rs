//! Explicit dispatch tables for the multiplexer's service/proxy method
//! sets (spec §9: "the request-name set is data, not code"). A service
//! registration is a name -> handler map built at composition time, not a
//! dynamically-augmented object — grounded in `spark-switch`'s
//! name-keyed `applications/registrar.rs`, which rejects collisions the
//! same way.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

/// A boxed stream of reply items for a `REPLY_STREAM` response, e.g.
/// `streamOperations`'s confirmed-operation feed.
pub type ValueStream = BoxStream<'static, Result<Value>>;

/// A handler's outcome: either a single `REPLY_VALUE` or a server-pushed
/// `REPLY_STREAM` (spec §4.1's frame kind pair).
pub enum Reply {
    Value(Value),
    Stream(ValueStream),
}

impl Reply {
    pub fn value(v: impl Into<Value>) -> Self {
        Reply::Value(v.into())
    }
}

/// One callable request handler: takes the request's array-shaped
/// argument list and returns a reply.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Reply>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Reply>> + Send + 'static,
{
    async fn call(&self, args: Vec<Value>) -> Result<Reply> {
        (self)(args).await
    }
}

/// Wraps a closure returning a plain `Result<Value>` (the common,
/// non-streaming case) into a [`RequestHandler`].
pub fn value_handler<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    struct Wrapped<F>(F);

    #[async_trait]
    impl<F, Fut> RequestHandler for Wrapped<F>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        async fn call(&self, args: Vec<Value>) -> Result<Reply> {
            (self.0)(args).await.map(Reply::Value)
        }
    }

    Arc::new(Wrapped(f))
}

/// Wraps a closure returning a [`ValueStream`] into a [`RequestHandler`]
/// whose reply is a `REPLY_STREAM`.
pub fn stream_handler<F, Fut>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ValueStream>> + Send + 'static,
{
    struct Wrapped<F>(F);

    #[async_trait]
    impl<F, Fut> RequestHandler for Wrapped<F>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ValueStream>> + Send + 'static,
    {
        async fn call(&self, args: Vec<Value>) -> Result<Reply> {
            (self.0)(args).await.map(Reply::Stream)
        }
    }

    Arc::new(Wrapped(f))
}

/// Server-side handler set for one service name (e.g. `"content"`).
/// Registration rejects name collisions; every declared request name
/// must resolve to a callable handler before the service is usable.
pub struct ServiceRegistry {
    service: String,
    handlers: DashMap<String, Arc<dyn RequestHandler>>,
}

impl ServiceRegistry {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            handlers: DashMap::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Registers `name -> handler`. Fails if `name` is already registered
    /// on this service.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Result<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(CoreError::already_exists("service_method", name, &self.service));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Dispatches a request by name. `NotFound` if the name was never
    /// registered (reproduces "every declared request name resolves to a
    /// callable on the handler").
    pub async fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Reply> {
        let handler = self
            .handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::not_found("service_method", name.to_owned()))?;
        handler.call(args).await
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Names a proxy registration must not shadow — the client-side
/// equivalent of intrinsic members on the generated caller object.
pub const RESERVED_PROXY_NAMES: &[&str] = &["connect", "disconnect", "destroy", "request"];

/// Client-side typed caller registration: validates that none of the
/// declared request names collide with [`RESERVED_PROXY_NAMES`].
pub struct ProxyRegistry {
    service: String,
    names: DashMap<String, ()>,
}

impl ProxyRegistry {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            names: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if RESERVED_PROXY_NAMES.contains(&name.as_str()) {
            return Err(CoreError::invalid_entity(
                "proxy_method",
                format!("{name} shadows an intrinsic member"),
            ));
        }
        if self.names.contains_key(&name) {
            return Err(CoreError::already_exists("proxy_method", name, &self.service));
        }
        self.names.insert(name, ());
        Ok(())
    }
}
