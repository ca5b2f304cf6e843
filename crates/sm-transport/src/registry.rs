//! Process-wide transport registry (spec §4.7): maps a symbolic name
//! (`:memory`, `:stdout`, `:broker`, ...) to a constructor, so
//! `Transport.create(name)` can instantiate the configured transport
//! without the caller knowing its concrete type. Grounded on
//! `sm-circuit::CircuitBreakerRegistry`'s get-or-create-by-name shape,
//! generalized from "build once and cache" to "build fresh on every call"
//! since transports are stateful resources callers are expected to own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::TransportError;
use crate::transport::Transport;

pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

#[derive(Default)]
pub struct TransportRegistry {
    factories: RwLock<HashMap<String, TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name`. Options specific to a
    /// transport (redis URL, sink path, loopback flag, ...) are expected to
    /// be captured by the closure at registration time.
    pub fn register(&self, name: impl Into<String>, factory: TransportFactory) {
        self.factories.write().insert(name.into(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownTransport(name.to_string()))?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessTransport;
    use crate::transport::InboundSink;
    use async_trait::async_trait;
    use sm_common::EncodedEnvelope;

    struct NoopSink;

    #[async_trait]
    impl InboundSink for NoopSink {
        async fn accept(&self, _envelope: EncodedEnvelope) {}
    }

    #[test]
    fn create_invokes_the_registered_factory() {
        let registry = TransportRegistry::new();
        registry.register(
            "memory",
            Arc::new(|| Arc::new(InProcessTransport::new("memory", Arc::new(NoopSink))) as Arc<dyn Transport>),
        );

        let transport = registry.create("memory").unwrap();
        assert_eq!(transport.name(), "memory");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let registry = TransportRegistry::new();
        assert!(registry.create("nonexistent").is_err());
    }
}
