//! Serializer abstraction (spec §4.3): encode a payload to bytes, decode
//! bytes back to a JSON value for the caller to reify into a typed message.
//! Operations are wrapped by the `:serializer` circuit breaker; on breaker
//! open they return a tagged fallback instead of raising, matching the
//! teacher's pattern of circuit-protecting I/O-adjacent calls
//! (`fc_router::mediator`).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sm_circuit::{CircuitBreaker, CircuitBreakerFallback, CircuitOutcome};
use sm_common::SmartMessageError;

/// `encode`/`decode` operate on `serde_json::Value` rather than a generic
/// type parameter so the trait stays object-safe; callers reify the value
/// into a concrete type with `serde_json::from_value`.
pub trait Serializer: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, SmartMessageError>;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, SmartMessageError>;
}

/// Default payload serializer: JSON in, JSON out.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, SmartMessageError> {
        serde_json::to_vec(value)
            .map_err(|e| SmartMessageError::Other(format!("json encode failed: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, SmartMessageError> {
        serde_json::from_slice(bytes)
            .map_err(|e| SmartMessageError::Other(format!("json decode failed: {e}")))
    }
}

pub enum EncodeOutcome {
    Encoded(Vec<u8>),
    Fallback(CircuitBreakerFallback),
}

pub enum DecodeOutcome {
    Decoded(serde_json::Value),
    Fallback(CircuitBreakerFallback),
}

/// A named serializer wrapped by its own `:serializer` circuit breaker
/// instance, so a misbehaving serializer degrades independently of others
/// registered under a different name.
pub struct CircuitSerializer {
    inner: Arc<dyn Serializer>,
    breaker: Arc<CircuitBreaker>,
}

impl CircuitSerializer {
    pub fn new(inner: Arc<dyn Serializer>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn encode(&self, value: &serde_json::Value) -> EncodeOutcome {
        let inner = self.inner.clone();
        let value = value.clone();
        match self.breaker.call(|| async move { inner.encode(&value) }).await {
            CircuitOutcome::Success(bytes) => EncodeOutcome::Encoded(bytes),
            CircuitOutcome::ShortCircuited(fallback) => EncodeOutcome::Fallback(fallback),
        }
    }

    pub async fn decode(&self, bytes: &[u8]) -> DecodeOutcome {
        let inner = self.inner.clone();
        let bytes = bytes.to_vec();
        match self.breaker.call(|| async move { inner.decode(&bytes) }).await {
            CircuitOutcome::Success(value) => DecodeOutcome::Decoded(value),
            CircuitOutcome::ShortCircuited(fallback) => DecodeOutcome::Fallback(fallback),
        }
    }
}

/// Looks serializers up by name so DLQ replay can re-instantiate a matching
/// decoder from the header's `serializer` field (spec §4.3, §9 open
/// question on missing-field fallback).
pub struct SerializerRegistry {
    serializers: RwLock<HashMap<String, Arc<CircuitSerializer>>>,
    default_name: String,
}

impl SerializerRegistry {
    pub fn new(breaker_factory: impl Fn(&str) -> Arc<CircuitBreaker>) -> Self {
        let mut registry = Self {
            serializers: RwLock::new(HashMap::new()),
            default_name: "json".to_string(),
        };
        registry.register(Arc::new(JsonSerializer), breaker_factory("json"));
        registry
    }

    pub fn register(&mut self, serializer: Arc<dyn Serializer>, breaker: Arc<CircuitBreaker>) {
        let name = serializer.name().to_string();
        self.serializers
            .write()
            .insert(name, Arc::new(CircuitSerializer::new(serializer, breaker)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitSerializer>> {
        self.serializers.read().get(name).cloned()
    }

    /// Best-effort lookup used by DLQ replay: an explicit name is honored if
    /// registered, an absent or unknown name falls back to the default JSON
    /// serializer and the caller is expected to log a warning (spec §9).
    pub fn get_or_default(&self, name: Option<&str>) -> Arc<CircuitSerializer> {
        name.and_then(|n| self.get(n))
            .unwrap_or_else(|| self.get(&self.default_name).expect("default serializer always registered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sm_circuit::defaults;

    fn registry() -> SerializerRegistry {
        SerializerRegistry::new(|name| Arc::new(CircuitBreaker::new(name, defaults::SERIALIZER)))
    }

    #[tokio::test]
    async fn json_round_trip() {
        let registry = registry();
        let serializer = registry.get("json").unwrap();
        let value = serde_json::json!({"order_id": "O1", "amount": 9.99});
        let bytes = match serializer.encode(&value).await {
            EncodeOutcome::Encoded(b) => b,
            EncodeOutcome::Fallback(_) => panic!("unexpected fallback"),
        };
        let decoded = match serializer.decode(&bytes).await {
            DecodeOutcome::Decoded(v) => v,
            DecodeOutcome::Fallback(_) => panic!("unexpected fallback"),
        };
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn unknown_serializer_name_falls_back_to_json() {
        let registry = registry();
        let serializer = registry.get_or_default(Some("nonexistent"));
        assert_eq!(serializer.name(), "json");
    }

    #[tokio::test]
    async fn missing_serializer_name_falls_back_to_json() {
        let registry = registry();
        let serializer = registry.get_or_default(None);
        assert_eq!(serializer.name(), "json");
    }
}
