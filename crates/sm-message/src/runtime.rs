//! Publish orchestration (spec §4.11) and the subscriber-side wiring that
//! ties a registered schema to the dispatcher and to every transport it is
//! bound to. This is the "process-wide configuration... registry keyed by
//! the typed message's schema identity" the design notes call for (spec
//! §9): one `MessageRuntime` per process, built once at startup, read on
//! every publish and every inbound decode.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sm_circuit::defaults;
use sm_common::{EncodedEnvelope, Envelope, Filters, PublishError, SmartMessageError};
use sm_dispatcher::{DdqConfig, Dispatcher, HandlerFn};
use sm_dlq::{DeadLetterQueue, ErrorInfo};
use sm_serializer::{EncodeOutcome, SerializerRegistry};
use sm_transport::{DispatcherSink, GuardedTransport, InboundSink, TransportRegistry};
use tracing::warn;

use crate::instance::MessageInstance;
use crate::schema::{MessageSchema, SchemaRegistry};

/// Wraps `DispatcherSink` with the version check spec §4.10 requires on
/// the inbound path: "a decoded envelope whose `header.version` does not
/// match the local class's expected version must fail decode and route to
/// DLQ." Classes with no registered schema are forwarded unchecked — only
/// classes this process actually declares have an opinion on version.
pub struct VersionCheckingSink {
    inner: DispatcherSink,
    schemas: Arc<SchemaRegistry>,
    dlq: Arc<DeadLetterQueue>,
}

impl VersionCheckingSink {
    pub fn new(dispatcher: Arc<Dispatcher>, schemas: Arc<SchemaRegistry>, dlq: Arc<DeadLetterQueue>) -> Self {
        Self {
            inner: DispatcherSink(dispatcher),
            schemas,
            dlq,
        }
    }
}

#[async_trait]
impl InboundSink for VersionCheckingSink {
    async fn accept(&self, envelope: EncodedEnvelope) {
        match self.schemas.get(&envelope.header.message_class) {
            Some(schema) if schema.version != envelope.header.version => {
                let message = format!(
                    "version mismatch: {} declares version {}, received version {}",
                    schema.message_class, schema.version, envelope.header.version
                );
                warn!(message_class = %schema.message_class, %message, "rejecting inbound envelope");
                if let Err(err) = self.dlq.enqueue(
                    envelope.header,
                    &envelope.payload,
                    "json",
                    ErrorInfo::new(message),
                    None,
                ) {
                    warn!(error = %err, "failed to enqueue version-mismatched envelope to dlq");
                }
            }
            _ => self.inner.accept(envelope).await,
        }
    }
}

/// One process's view of the messaging runtime: schema registry, transport
/// registry plus the circuit-guarded wrappers built lazily over it,
/// serializer registry, dispatcher, DLQ, and the default transport list
/// used when a schema declares none of its own.
pub struct MessageRuntime {
    schemas: Arc<SchemaRegistry>,
    transport_registry: Arc<TransportRegistry>,
    guarded: DashMap<String, Arc<GuardedTransport>>,
    serializers: Arc<SerializerRegistry>,
    dispatcher: Arc<Dispatcher>,
    dlq: Arc<DeadLetterQueue>,
    default_transports: Vec<String>,
    publish_counts: DashMap<String, AtomicU64>,
}

impl MessageRuntime {
    pub fn new(
        transport_registry: Arc<TransportRegistry>,
        serializers: Arc<SerializerRegistry>,
        dispatcher: Arc<Dispatcher>,
        dlq: Arc<DeadLetterQueue>,
        default_transports: Vec<String>,
    ) -> Self {
        Self {
            schemas: Arc::new(SchemaRegistry::new()),
            transport_registry,
            guarded: DashMap::new(),
            serializers,
            dispatcher,
            dlq,
            default_transports,
            publish_counts: DashMap::new(),
        }
    }

    pub fn schemas(&self) -> Arc<SchemaRegistry> {
        self.schemas.clone()
    }

    /// Sink to hand to every transport constructed for this runtime — the
    /// version-checking inbound path of spec §4.10.
    pub fn inbound_sink(&self) -> Arc<dyn InboundSink> {
        Arc::new(VersionCheckingSink::new(
            self.dispatcher.clone(),
            self.schemas.clone(),
            self.dlq.clone(),
        ))
    }

    pub fn register_schema(&self, schema: MessageSchema) -> Arc<MessageSchema> {
        self.schemas.register(schema)
    }

    fn guarded_transport(&self, name: &str) -> Result<Arc<GuardedTransport>, SmartMessageError> {
        if let Some(existing) = self.guarded.get(name) {
            return Ok(existing.clone());
        }
        let transport = self
            .transport_registry
            .create(name)
            .map_err(|e| SmartMessageError::TransportNotConfigured(e.to_string()))?;
        let guarded = Arc::new(GuardedTransport::new(transport, self.dlq.clone()));
        self.guarded.insert(name.to_string(), guarded.clone());
        Ok(guarded)
    }

    fn transports_for(&self, schema: &MessageSchema) -> Vec<String> {
        if schema.transports.is_empty() {
            self.default_transports.clone()
        } else {
            schema.transports.clone()
        }
    }

    fn record_publish(&self, message_class: &str) {
        self.publish_counts
            .entry(message_class.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn publish_count_for(&self, message_class: &str) -> u64 {
        self.publish_counts
            .get(message_class)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Drains the dispatcher's worker pool (spec §4.9.6). Handler execution
    /// is scheduled onto that pool and has no other happens-before
    /// relationship with `publish`/inbound delivery, so callers that need
    /// to observe handler side effects must await this first.
    pub async fn shutdown(&self) -> Result<(), SmartMessageError> {
        self.dispatcher
            .shutdown()
            .await
            .map_err(|e| SmartMessageError::Other(e.to_string()))
    }

    /// Spec §4.11 `Message.publish`, steps 1-6.
    pub async fn publish<T: Serialize>(
        &self,
        schema: &MessageSchema,
        instance: MessageInstance<T>,
    ) -> Result<(), SmartMessageError> {
        instance.validate(schema)?;

        let mut header = instance.header;
        header.published_at = chrono::Utc::now();
        header.publisher_pid = std::process::id();
        header.serializer = Some(schema.serializer_name.clone());

        let payload_json = serde_json::to_value(&instance.payload)
            .map_err(|e| SmartMessageError::Other(format!("payload encode failed: {e}")))?;
        let serializer = self.serializers.get_or_default(Some(&schema.serializer_name));
        let payload_bytes = match serializer.encode(&payload_json).await {
            EncodeOutcome::Encoded(bytes) => bytes,
            EncodeOutcome::Fallback(fallback) => {
                return Err(SmartMessageError::SerializerNotConfigured(format!(
                    "serializer {} circuit open: {}",
                    schema.serializer_name,
                    fallback.error.unwrap_or_default()
                )));
            }
        };

        let transport_names = self.transports_for(schema);
        if transport_names.is_empty() {
            return Err(SmartMessageError::TransportNotConfigured(format!(
                "{} has no transports configured and no default transport is set",
                schema.message_class
            )));
        }

        let mut failures = Vec::new();
        let mut successes = 0usize;
        for name in &transport_names {
            let outcome = match self.guarded_transport(name) {
                Ok(transport) => {
                    let envelope = EncodedEnvelope::new(header.clone(), payload_bytes.clone());
                    transport.publish(envelope).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => successes += 1,
                Err(err) => failures.push((name.clone(), err)),
            }
        }

        self.record_publish(&schema.message_class);

        if successes > 0 {
            for (name, err) in &failures {
                warn!(transport = %name, error = %err, message_class = %schema.message_class, "transport publish failed, other transports succeeded");
            }
            Ok(())
        } else {
            Err(SmartMessageError::PublishError(PublishError { failures }))
        }
    }

    /// Registers a typed handler: wires the dispatcher's handler registry
    /// and subscription table (spec §4.9.1), creates the class's DDQ if
    /// declared, and asks every bound transport to subscribe so inbound
    /// envelopes for this class reach `route` (spec §4.7).
    pub async fn subscribe<T, F, Fut>(
        &self,
        schema: &MessageSchema,
        handler_id: &str,
        filters: Filters,
        handler: F,
    ) -> Result<(), SmartMessageError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn(Envelope<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SmartMessageError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: HandlerFn = Arc::new(move |encoded: EncodedEnvelope| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: T = serde_json::from_slice(&encoded.payload)
                    .map_err(|e| SmartMessageError::Other(format!("payload decode failed: {e}")))?;
                handler(Envelope::new(encoded.header, payload)).await
            })
        });
        self.dispatcher.register_named_handler(handler_id, wrapped);

        let ddq_config = schema.ddq.enabled.then(|| DdqConfig { capacity: schema.ddq.capacity });
        self.dispatcher
            .add(&schema.message_class, handler_id, filters.clone(), ddq_config);

        for name in self.transports_for(schema) {
            let transport = self.guarded_transport(&name)?;
            transport
                .subscribe(&schema.message_class, handler_id, filters.clone())
                .await?;
        }
        Ok(())
    }
}

/// A `sm-dlq::ReplayTarget` that republishes through a single named
/// transport via the runtime's circuit-guarded wrapper — what DLQ replay
/// uses to send an entry back out (spec §4.6 "Replay semantics").
pub struct RuntimeReplayTarget<'a> {
    runtime: &'a MessageRuntime,
    transport_name: String,
}

impl<'a> RuntimeReplayTarget<'a> {
    pub fn new(runtime: &'a MessageRuntime, transport_name: impl Into<String>) -> Self {
        Self {
            runtime,
            transport_name: transport_name.into(),
        }
    }
}

#[async_trait]
impl<'a> sm_dlq::ReplayTarget for RuntimeReplayTarget<'a> {
    async fn publish_replay(&self, header: &sm_common::Header, payload_bytes: &[u8]) -> Result<(), SmartMessageError> {
        let transport = self.runtime.guarded_transport(&self.transport_name)?;
        transport
            .publish(EncodedEnvelope::new(header.clone(), payload_bytes.to_vec()))
            .await
    }
}

/// Spec §4.5 defaults re-exported for composition roots wiring their own
/// breaker instances outside the ones the dispatcher/transport crates
/// create automatically.
pub use defaults as circuit_defaults;
