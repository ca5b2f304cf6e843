//! Standard-output / file transport (spec §4.8 "Standard-output / file").
//! Serializes each published envelope to a human-readable line and writes it
//! to a configured sink (stdout, stderr, or a file path). Supports a
//! `loopback` option that also routes the envelope to the local dispatcher;
//! subscription only works in loopback mode. Grounded on the teacher's
//! `fc-common::logging` dual-sink convention (stdout vs. file writer chosen
//! by configuration, not by a second code path).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sm_common::{EncodedEnvelope, Filters};

use crate::error::TransportError;
use crate::transport::{InboundSink, Transport};

#[derive(Clone)]
pub enum Sink {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Renders an envelope as one human-readable line: header fields inline,
/// payload as compact JSON. Not meant to round-trip — `EncodedEnvelope`'s
/// wire format (spec §6.1) is what transports that need to decode consume.
fn render_line(envelope: &EncodedEnvelope) -> String {
    let payload: serde_json::Value =
        serde_json::from_slice(&envelope.payload).unwrap_or_else(|_| serde_json::Value::Null);
    format!(
        "[{}] {} from={} to={} uuid={} payload={}",
        envelope.header.published_at.to_rfc3339(),
        envelope.header.message_class,
        envelope.header.from,
        envelope.header.to.as_deref().unwrap_or("<broadcast>"),
        envelope.header.uuid,
        payload
    )
}

pub struct StdoutTransport {
    name: String,
    sink: Sink,
    loopback: bool,
    dispatch_sink: Option<Arc<dyn InboundSink>>,
    file_lock: Mutex<()>,
}

impl StdoutTransport {
    pub fn new(name: impl Into<String>, sink: Sink) -> Self {
        Self {
            name: name.into(),
            sink,
            loopback: false,
            dispatch_sink: None,
            file_lock: Mutex::new(()),
        }
    }

    /// Enables loopback: published envelopes are also handed to `sink` so
    /// subscribers in the same process can observe them (spec §4.8).
    pub fn with_loopback(mut self, sink: Arc<dyn InboundSink>) -> Self {
        self.loopback = true;
        self.dispatch_sink = Some(sink);
        self
    }

    fn write_line(&self, line: &str) -> Result<(), TransportError> {
        match &self.sink {
            Sink::Stdout => {
                println!("{line}");
                Ok(())
            }
            Sink::Stderr => {
                eprintln!("{line}");
                Ok(())
            }
            Sink::File(path) => {
                let _guard = self.file_lock.lock();
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| TransportError::PublishFailed(format!("failed to open sink file: {e}")))?;
                writeln!(file, "{line}")
                    .map_err(|e| TransportError::PublishFailed(format!("failed to write sink file: {e}")))?;
                file.sync_all()
                    .map_err(|e| TransportError::PublishFailed(format!("failed to sync sink file: {e}")))?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Transport for StdoutTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connected(&self) -> bool {
        true
    }

    async fn publish(&self, envelope: EncodedEnvelope) -> Result<(), TransportError> {
        let line = render_line(&envelope);
        self.write_line(&line)?;
        if let Some(dispatch_sink) = &self.dispatch_sink {
            dispatch_sink.accept(envelope).await;
        }
        Ok(())
    }

    async fn subscribe(&self, message_class: &str, _handler_id: &str, _filters: Filters) -> Result<(), TransportError> {
        if !self.loopback {
            return Err(TransportError::SubscribeFailed(format!(
                "stdout/file transport {} does not support subscribe without loopback (class {message_class})",
                self.name
            )));
        }
        Ok(())
    }

    async fn unsubscribe(&self, _message_class: &str, _handler_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn unsubscribe_all(&self, _message_class: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sm_common::Header;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl InboundSink for CountingSink {
        async fn accept(&self, _envelope: EncodedEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn envelope() -> EncodedEnvelope {
        EncodedEnvelope::new(
            Header::new("OrderCreated", 1, "orders-service"),
            serde_json::to_vec(&serde_json::json!({"order_id": "O1"})).unwrap(),
        )
    }

    #[tokio::test]
    async fn publish_without_loopback_does_not_route() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let transport = StdoutTransport::new("file", Sink::File(path.clone()));
        transport.publish(envelope()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("OrderCreated"));
    }

    #[tokio::test]
    async fn publish_with_loopback_also_routes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let count = Arc::new(AtomicUsize::new(0));
        let transport = StdoutTransport::new("file", Sink::File(path))
            .with_loopback(Arc::new(CountingSink(count.clone())));
        transport.publish(envelope()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribe_without_loopback_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let transport = StdoutTransport::new("file", Sink::File(path));
        assert!(transport.subscribe("OrderCreated", "Sub.handle", Filters::new()).await.is_err());
    }
}
