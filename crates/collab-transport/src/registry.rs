//! Thin wrappers tying [`collab_core::dispatch`]'s name-keyed registries
//! to a connection's destroy lifecycle: registration after `destroy`
//! fails, per spec §4.1. Grounded in `spark-switch`'s
//! `applications/registrar.rs`, which gates registration the same way on
//! its own lifecycle flag.

use collab_core::dispatch::{ProxyRegistry, RequestHandler, ServiceRegistry};
use collab_core::error::{CoreError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A [`ServiceRegistry`] that rejects further registration once the
/// owning connection has been destroyed.
pub struct ServiceRegistration {
    registry: Arc<ServiceRegistry>,
    destroyed: Arc<AtomicBool>,
}

impl ServiceRegistration {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            registry: Arc::new(ServiceRegistry::new(service)),
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::assert("service registration attempted after destroy"));
        }
        self.registry.register(name, handler)
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// A [`ProxyRegistry`] with the same destroy-gating behaviour on the
/// client side.
pub struct ProxyRegistration {
    registry: ProxyRegistry,
    destroyed: Arc<AtomicBool>,
}

impl ProxyRegistration {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            registry: ProxyRegistry::new(service),
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn register(&self, name: impl Into<String>) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CoreError::assert("proxy registration attempted after destroy"));
        }
        self.registry.register(name)
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::dispatch::value_handler;
    use serde_json::Value;

    #[tokio::test]
    async fn registration_after_destroy_fails() {
        let registration = ServiceRegistration::new("content");
        registration.mark_destroyed();
        let err = registration
            .register("submitOperation", value_handler(|_args| async { Ok(Value::Null) }))
            .unwrap_err();
        assert!(matches!(err, CoreError::Assert { .. }));
    }

    #[test]
    fn proxy_registration_after_destroy_fails() {
        let registration = ProxyRegistration::new("content");
        registration.mark_destroyed();
        assert!(registration.register("getSnapshot").is_err());
    }
}
