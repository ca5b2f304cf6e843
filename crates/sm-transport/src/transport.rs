//! Transport base contract (spec §4.7). Grounded on the teacher's
//! `fc_queue::{QueueConsumer, QueuePublisher}` trait shape, generalized from
//! a point-to-point queue pair into one bidirectional pub/sub contract, and
//! on `fc_router::mediator`'s pattern of wrapping I/O calls with a named
//! circuit breaker whose fallback is "send to DLQ".

use std::sync::Arc;

use async_trait::async_trait;
use sm_circuit::{defaults, CircuitBreaker, CircuitOutcome};
use sm_common::{EncodedEnvelope, Filters, SmartMessageError};
use sm_dlq::{DeadLetterQueue, ErrorInfo};
use sm_serializer::{DecodeOutcome, SerializerRegistry};
use tracing::warn;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    fn connected(&self) -> bool;
    /// Emits bytes outward. Callers pass the already-encoded envelope;
    /// serialization of the payload happened one layer up (spec §4.11 step
    /// 4: "transport performs serialization" — in this workspace that
    /// serialization happens via `sm-serializer` before the call, and the
    /// transport's job is strictly wire delivery).
    async fn publish(&self, envelope: EncodedEnvelope) -> Result<(), TransportError>;
    async fn subscribe(&self, message_class: &str, handler_id: &str, filters: Filters) -> Result<(), TransportError>;
    async fn unsubscribe(&self, message_class: &str, handler_id: &str) -> Result<(), TransportError>;
    async fn unsubscribe_all(&self, message_class: &str) -> Result<(), TransportError>;
}

/// What a transport listener hands decoded envelopes to. `sm-transport`
/// cannot depend on `sm-message` (which owns per-class version checking),
/// so the inbound path is parameterized over this trait instead — the same
/// circularity break used for `sm-dlq::ReplayTarget`.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn accept(&self, envelope: EncodedEnvelope);
}

/// Forwards straight to a dispatcher's `route`, with no version checking.
/// Suitable wiring when no schema registry layer is involved (tests, a
/// single-class in-process setup) — `sm-message` supplies a
/// version-checking sink that wraps one of these for production use.
pub struct DispatcherSink(pub Arc<sm_dispatcher::Dispatcher>);

#[async_trait]
impl InboundSink for DispatcherSink {
    async fn accept(&self, envelope: EncodedEnvelope) {
        self.0.route(envelope).await;
    }
}

/// Parses the wire wrapper, confirms the payload is decodable by the
/// serializer named in the header (falling back to the default per spec
/// §9), and on success hands the envelope to `sink`. Decode failures are
/// logged and, when a header was recoverable, enqueued to the DLQ with
/// error `decode_failure` (spec §4.7).
pub async fn handle_inbound_bytes(
    bytes: &[u8],
    transport_name: &str,
    serializers: &SerializerRegistry,
    dlq: &DeadLetterQueue,
    sink: &dyn InboundSink,
) {
    let encoded = match EncodedEnvelope::from_wire_bytes(bytes) {
        Ok(e) => e,
        Err(err) => {
            warn!(transport = transport_name, error = %err, "failed to parse inbound envelope wrapper, header unrecoverable");
            return;
        }
    };

    let serializer = serializers.get_or_default(encoded.header.serializer.as_deref());
    match serializer.decode(&encoded.payload).await {
        DecodeOutcome::Decoded(_) => sink.accept(encoded).await,
        DecodeOutcome::Fallback(fallback) => {
            warn!(
                transport = transport_name,
                message_class = %encoded.header.message_class,
                error = ?fallback.error,
                "decode_failure: serializer circuit open, enqueuing to dlq"
            );
            if let Err(err) = dlq.enqueue(
                encoded.header,
                &encoded.payload,
                serializer.name(),
                ErrorInfo::new("decode_failure: serializer unavailable"),
                Some(transport_name.to_string()),
            ) {
                warn!(error = %err, "failed to enqueue decode failure to dlq");
            }
        }
    }
}

/// Wraps any `Transport` with the `transport_publish`/`transport_subscribe`
/// circuit breakers spec §4.7 requires, routing publish fallbacks to the
/// DLQ by default.
pub struct GuardedTransport {
    inner: Arc<dyn Transport>,
    publish_breaker: Arc<CircuitBreaker>,
    subscribe_breaker: Arc<CircuitBreaker>,
    dlq: Arc<DeadLetterQueue>,
}

impl GuardedTransport {
    pub fn new(inner: Arc<dyn Transport>, dlq: Arc<DeadLetterQueue>) -> Self {
        let name = inner.name().to_string();
        Self {
            inner,
            publish_breaker: Arc::new(CircuitBreaker::new(
                format!("transport_publish:{name}"),
                defaults::TRANSPORT_PUBLISH,
            )),
            subscribe_breaker: Arc::new(CircuitBreaker::new(
                format!("transport_subscribe:{name}"),
                defaults::TRANSPORT_SUBSCRIBE,
            )),
            dlq,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn connected(&self) -> bool {
        self.inner.connected()
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        self.inner.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    /// On circuit-open short-circuit, the envelope is enqueued to the DLQ
    /// (the default `transport_publish` fallback) and `publish` still
    /// returns `Err` so the caller's multi-transport accounting (spec
    /// §4.11) sees this transport as failed.
    pub async fn publish(&self, envelope: EncodedEnvelope) -> Result<(), SmartMessageError> {
        let inner = self.inner.clone();
        let header = envelope.header.clone();
        let payload = envelope.payload.clone();
        let name = self.name().to_string();
        let outcome = self
            .publish_breaker
            .call(|| async move { inner.publish(envelope).await.map_err(SmartMessageError::from) })
            .await;

        match outcome {
            CircuitOutcome::Success(()) => Ok(()),
            CircuitOutcome::ShortCircuited(fallback) => {
                let error = fallback.error.clone().unwrap_or_else(|| "circuit open".to_string());
                if let Err(err) = self.dlq.enqueue(
                    header,
                    &payload,
                    "json",
                    ErrorInfo::new(error.clone()),
                    Some(name),
                ) {
                    warn!(error = %err, "failed to enqueue publish failure to dlq");
                }
                Err(SmartMessageError::Other(error))
            }
        }
    }

    pub async fn subscribe(&self, message_class: &str, handler_id: &str, filters: Filters) -> Result<(), SmartMessageError> {
        let inner = self.inner.clone();
        let message_class = message_class.to_string();
        let handler_id = handler_id.to_string();
        let outcome = self
            .subscribe_breaker
            .call(|| async move {
                inner
                    .subscribe(&message_class, &handler_id, filters)
                    .await
                    .map_err(SmartMessageError::from)
            })
            .await;
        match outcome {
            CircuitOutcome::Success(()) => Ok(()),
            CircuitOutcome::ShortCircuited(fallback) => Err(SmartMessageError::Other(
                fallback.error.unwrap_or_else(|| "circuit open".to_string()),
            )),
        }
    }

    pub async fn unsubscribe(&self, message_class: &str, handler_id: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe(message_class, handler_id).await
    }

    pub async fn unsubscribe_all(&self, message_class: &str) -> Result<(), TransportError> {
        self.inner.unsubscribe_all(message_class).await
    }
}
