//! The dispatcher (spec §4.9): subscription table, filter match, DDQ check,
//! worker-pool fan-out, bounded shutdown. Single per-process instance; the
//! in-process transport calls `route` synchronously on the publisher
//! thread, while `route` itself only ever *schedules* handler work onto the
//! pool (spec §5).

use std::sync::Arc;

use sm_circuit::{defaults, CircuitBreakerRegistry, CircuitOutcome};
use sm_common::{EncodedEnvelope, Filters};
use sm_ddq::Ddq;
use sm_dlq::{DeadLetterQueue, ErrorInfo};
use tracing::warn;

use crate::error::DispatchError;
use crate::handler::{HandlerFn, HandlerRegistry};
use crate::pool::WorkerPool;
use crate::subscription::SubscriptionTable;

/// DDQ configuration a message class supplies at registration time (spec
/// §4.9.1: "using the class's DDQ configuration").
#[derive(Clone, Copy)]
pub struct DdqConfig {
    pub capacity: usize,
}

impl Default for DdqConfig {
    fn default() -> Self {
        Self {
            capacity: sm_ddq::DEFAULT_CAPACITY,
        }
    }
}

fn ddq_key(message_class: &str, handler_id: &str) -> (String, String) {
    (message_class.to_string(), handler_id.to_string())
}

pub struct Dispatcher {
    subscribers: SubscriptionTable,
    ddqs: dashmap::DashMap<(String, String), Arc<Ddq>>,
    handlers: HandlerRegistry,
    message_processor_breakers: Arc<CircuitBreakerRegistry>,
    dlq: Arc<DeadLetterQueue>,
    pool: WorkerPool,
}

impl Dispatcher {
    pub fn new(dlq: Arc<DeadLetterQueue>, concurrency: usize) -> Self {
        Self {
            subscribers: SubscriptionTable::new(),
            ddqs: dashmap::DashMap::new(),
            handlers: HandlerRegistry::new(),
            message_processor_breakers: Arc::new(CircuitBreakerRegistry::new(defaults::MESSAGE_PROCESSOR)),
            dlq,
            pool: WorkerPool::new(concurrency),
        }
    }

    pub fn register_named_handler(&self, handler_id: impl Into<String>, f: HandlerFn) {
        self.handlers.register_named(handler_id, f);
    }

    pub fn register_closure(&self, f: HandlerFn) -> String {
        self.handlers.register_closure(f)
    }

    /// §4.9.1 registration: creates the DDQ for `(message_class,
    /// handler_id)` on first use when DDQ is enabled, then appends the
    /// subscription unless an identical one already exists.
    pub fn add(
        &self,
        message_class: &str,
        handler_id: &str,
        filters: Filters,
        ddq: Option<DdqConfig>,
    ) -> bool {
        if let Some(cfg) = ddq {
            let key = ddq_key(message_class, handler_id);
            self.ddqs.entry(key.clone()).or_insert_with(|| {
                Arc::new(Ddq::memory(format!("{}#{}", key.0, key.1), cfg.capacity))
            });
        }
        self.subscribers.add(message_class, handler_id, filters)
    }

    /// §4.9.2 deregistration: drops the one matching subscription; when the
    /// last subscription for the pair disappears, its DDQ is destroyed.
    pub fn drop_subscription(&self, message_class: &str, handler_id: &str, filters: &Filters) {
        let was_last = self.subscribers.drop_one(message_class, handler_id, filters);
        if was_last {
            self.ddqs.remove(&ddq_key(message_class, handler_id));
        }
        self.handlers.remove(handler_id);
    }

    pub fn drop_subscriber(&self, message_class: &str, handler_id: &str) {
        self.subscribers.drop_subscriber(message_class, handler_id);
        self.ddqs.remove(&ddq_key(message_class, handler_id));
        self.handlers.remove(handler_id);
    }

    pub fn drop_all(&self, message_class: &str) {
        self.subscribers.drop_all(message_class);
    }

    /// `drop_all!` — resets all dispatcher state.
    pub fn drop_all_state(&self) {
        self.subscribers.drop_all_classes();
        self.ddqs.clear();
    }

    /// §4.9.3 routing. Matches filters, checks the DDQ, and schedules
    /// matching subscriptions onto the worker pool. Never blocks on
    /// handler execution — only on enqueuing the work.
    pub async fn route(&self, envelope: EncodedEnvelope) {
        let subs = self.subscribers.subscriptions_for(&envelope.header.message_class);
        if subs.is_empty() {
            return;
        }

        for sub in subs {
            if !sub.filters.matches(&envelope.header) {
                continue;
            }

            // Reserve the uuid atomically, before scheduling work, so two
            // in-flight duplicates of the same envelope can't both pass a
            // `contains` check before either has had a chance to `add`
            // (spec §4.9.3, Property P5). A circuit-breaker fallback below
            // releases the reservation again so a failed attempt is not
            // permanently marked processed.
            let key = ddq_key(&envelope.header.message_class, &sub.handler_id);
            if let Some(ddq) = self.ddqs.get(&key) {
                if !ddq.try_reserve(envelope.header.uuid).await {
                    warn!(
                        message_class = %envelope.header.message_class,
                        handler_id = %sub.handler_id,
                        uuid = %envelope.header.uuid,
                        "ddq deduplicated envelope, skipping dispatch"
                    );
                    continue;
                }
            }

            let Some(handler) = self.handlers.get(&sub.handler_id) else {
                warn!(handler_id = %sub.handler_id, "no handler registered for subscription, skipping");
                continue;
            };

            let breaker_name = format!("message_processor:{}#{}", envelope.header.message_class, sub.handler_id);
            let breaker = self.message_processor_breakers.get_or_create(&breaker_name);
            let dlq = self.dlq.clone();
            let ddq = self.ddqs.get(&key).map(|e| e.clone());
            let envelope = envelope.clone();
            let handler_id = sub.handler_id.clone();

            self.pool
                .spawn(async move {
                    let envelope_for_handler = envelope.clone();
                    let outcome = breaker
                        .call(|| {
                            let handler = handler.clone();
                            async move { handler(envelope_for_handler).await }
                        })
                        .await;

                    match outcome {
                        CircuitOutcome::Success(()) => {
                            // Already reserved in the ddq before this task was
                            // spawned; nothing left to mark.
                        }
                        CircuitOutcome::ShortCircuited(fallback) => {
                            // The handler never ran, so undo the reservation
                            // made before scheduling (spec §4.9.3 step 3: not
                            // marked processed on a CB fallback).
                            if let Some(ddq) = ddq {
                                ddq.release(envelope.header.uuid).await;
                            }
                            let error = fallback
                                .error
                                .unwrap_or_else(|| "circuit breaker open".to_string());
                            if let Err(err) = dlq.enqueue(
                                envelope.header.clone(),
                                &envelope.payload,
                                "json",
                                ErrorInfo::new(error),
                                Some(format!("handler:{handler_id}")),
                            ) {
                                warn!(error = %err, "failed to enqueue undeliverable message to dlq");
                            }
                        }
                    }
                })
                .await;
        }
    }

    /// §4.9.6 shutdown: stop accepting new routing, wait up to 3 seconds
    /// for in-flight work, then force-stop whatever remains.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        self.pool.shutdown().await;
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }
}
