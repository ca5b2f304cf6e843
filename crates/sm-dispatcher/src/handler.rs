//! Handler representation (spec §4.9.5, §9 "Dynamic dispatch to handlers").
//! The source resolves handlers by string method name via reflection, or by
//! an opaque id into a closure registry. Here both collapse to the same
//! `HandlerFn` shape stored in one concurrent map keyed by `handler_id`;
//! "named" vs "closure" is purely a convention of how the caller picked the
//! id, not a distinct representation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use sm_common::{EncodedEnvelope, SmartMessageError};
use uuid::Uuid;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), SmartMessageError>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(EncodedEnvelope) -> HandlerFuture + Send + Sync>;

/// Process-wide handler registry. Entries are inserted at subscribe time and
/// removed at unsubscribe (spec §4.9.5: "registry entries are GC'd on
/// unsubscribe").
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named handler under a caller-chosen, stable id (the
    /// `"Target.method"` convention of spec §4.9.5).
    pub fn register_named(&self, handler_id: impl Into<String>, f: HandlerFn) {
        self.handlers.insert(handler_id.into(), f);
    }

    /// Registers a closure under a freshly generated opaque id and returns
    /// it, per spec §4.9.5's closure registry.
    pub fn register_closure(&self, f: HandlerFn) -> String {
        let handler_id = format!("closure-{}", Uuid::new_v4());
        self.handlers.insert(handler_id.clone(), f);
        handler_id
    }

    pub fn get(&self, handler_id: &str) -> Option<HandlerFn> {
        self.handlers.get(handler_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, handler_id: &str) {
        self.handlers.remove(handler_id);
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.handlers.contains_key(handler_id)
    }
}
