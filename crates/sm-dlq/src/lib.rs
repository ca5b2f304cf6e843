//! Dead-Letter Queue (spec §4.6): an append-only line-delimited JSON file of
//! failed envelopes, with inspection, filtering, statistics and replay.
//!
//! `sm-dlq` intentionally does not depend on `sm-transport` — that would be
//! circular, since transports enqueue decode failures here and replay needs
//! to publish back out through a transport. Instead replay targets
//! implement the small `ReplayTarget` trait defined in this crate.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sm_common::{Header, SmartMessageError};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DlqError {
    #[error("dlq io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dlq serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One stored line, per spec §6.3 and §3.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub timestamp: DateTime<Utc>,
    pub header: Header,
    /// The serializer's output bytes for the payload, stored as a string
    /// (spec §6.3: "the bytes as produced by the serializer").
    pub payload: String,
    pub payload_format: String,
    pub error: String,
    pub retry_count: u32,
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    pub message: String,
    pub stack_trace: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStatistics {
    pub total: usize,
    pub by_class: HashMap<String, usize>,
    pub by_error: HashMap<String, usize>,
}

/// What a replayed entry is published back through. Implemented by
/// `sm-transport`'s concrete transports so `replay_one`/`replay_batch`/
/// `replay_all` can publish without this crate depending on `sm-transport`.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    async fn publish_replay(&self, header: &Header, payload_bytes: &[u8]) -> Result<(), SmartMessageError>;
}

#[derive(Debug)]
pub enum ReplayOutcome {
    Replayed,
    Empty,
    Failed { error: String },
}

/// File-backed DLQ. All writes go through `lock`; dequeue performs the
/// read-all/drop-first/write-back rewrite spec §5 calls for, trading
/// throughput for ordering simplicity on what is expected to be a small
/// file.
pub struct DeadLetterQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeadLetterQueue {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, DlqError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn enqueue(
        &self,
        header: Header,
        payload: &[u8],
        payload_format: &str,
        error: ErrorInfo,
        transport: Option<String>,
    ) -> Result<(), DlqError> {
        let entry = DlqEntry {
            timestamp: Utc::now(),
            header,
            payload: String::from_utf8_lossy(payload).into_owned(),
            payload_format: payload_format.to_string(),
            error: error.message,
            retry_count: 0,
            transport,
            stack_trace: error.stack_trace,
        };
        self.append(&entry)
    }

    fn append(&self, entry: &DlqEntry) -> Result<(), DlqError> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads every line, skipping and logging malformed ones (spec §4.6,
    /// §6.3: "readers must tolerate and skip malformed lines").
    fn read_all(&self) -> Result<Vec<DlqEntry>, DlqError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DlqEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    warn!(line = lineno, error = %err, "skipping corrupted dlq line");
                }
            }
        }
        Ok(entries)
    }

    fn write_all(&self, entries: &[DlqEntry]) -> Result<(), DlqError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            for entry in entries {
                let line = serde_json::to_string(entry)?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn dequeue(&self) -> Result<Option<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_all()?;
        if entries.is_empty() {
            return Ok(None);
        }
        let first = entries.remove(0);
        self.write_all(&entries)?;
        Ok(Some(first))
    }

    pub fn peek(&self) -> Result<Option<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.into_iter().next())
    }

    pub fn size(&self) -> Result<usize, DlqError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.len())
    }

    pub fn clear(&self) -> Result<(), DlqError> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn inspect_messages(&self, limit: usize) -> Result<Vec<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.into_iter().take(limit).collect())
    }

    pub fn filter_by_class(&self, message_class: &str) -> Result<Vec<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.header.message_class == message_class)
            .collect())
    }

    pub fn filter_by_error_pattern(&self, pattern: &Regex) -> Result<Vec<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| pattern.is_match(&e.error))
            .collect())
    }

    pub fn statistics(&self) -> Result<DlqStatistics, DlqError> {
        let _guard = self.lock.lock();
        let entries = self.read_all()?;
        let mut stats = DlqStatistics {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            *stats.by_class.entry(entry.header.message_class.clone()).or_default() += 1;
            *stats.by_error.entry(entry.error.clone()).or_default() += 1;
        }
        Ok(stats)
    }

    pub fn export_range(
        &self,
        from_ts: DateTime<Utc>,
        to_ts: DateTime<Utc>,
    ) -> Result<Vec<DlqEntry>, DlqError> {
        let _guard = self.lock.lock();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.timestamp >= from_ts && e.timestamp <= to_ts)
            .collect())
    }

    /// Dequeues the oldest entry and republishes it through `target`. On
    /// success the entry stays removed (it was already dequeued). On
    /// failure it is re-enqueued with `retry_count` incremented and the
    /// error message refreshed.
    pub async fn replay_one(&self, target: &dyn ReplayTarget) -> Result<ReplayOutcome, DlqError> {
        let Some(entry) = self.dequeue()? else {
            return Ok(ReplayOutcome::Empty);
        };
        match target
            .publish_replay(&entry.header, entry.payload.as_bytes())
            .await
        {
            Ok(()) => Ok(ReplayOutcome::Replayed),
            Err(err) => {
                let retried = DlqEntry {
                    retry_count: entry.retry_count + 1,
                    error: err.to_string(),
                    ..entry
                };
                self.append(&retried)?;
                Ok(ReplayOutcome::Failed { error: err.to_string() })
            }
        }
    }

    pub async fn replay_batch(&self, n: usize, target: &dyn ReplayTarget) -> Result<Vec<ReplayOutcome>, DlqError> {
        let mut outcomes = Vec::with_capacity(n);
        for _ in 0..n {
            let outcome = self.replay_one(target).await?;
            let is_empty = matches!(outcome, ReplayOutcome::Empty);
            outcomes.push(outcome);
            if is_empty {
                break;
            }
        }
        Ok(outcomes)
    }

    pub async fn replay_all(&self, target: &dyn ReplayTarget) -> Result<Vec<ReplayOutcome>, DlqError> {
        let mut outcomes = Vec::new();
        loop {
            let outcome = self.replay_one(target).await?;
            let is_empty = matches!(outcome, ReplayOutcome::Empty);
            outcomes.push(outcome);
            if is_empty {
                break;
            }
        }
        Ok(outcomes)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn header() -> Header {
        Header::new("OrderCreated", 1, "orders-service")
    }

    #[test]
    fn round_trip_enqueue_peek_dequeue() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        dlq.enqueue(header(), b"{\"order_id\":\"O1\"}", "json", ErrorInfo::new("boom"), Some("memory".into()))
            .unwrap();

        let peeked = dlq.peek().unwrap().unwrap();
        assert_eq!(peeked.error, "boom");
        assert_eq!(dlq.size().unwrap(), 1);

        let dequeued = dlq.dequeue().unwrap().unwrap();
        assert_eq!(dequeued.header.uuid, peeked.header.uuid);
        assert_eq!(dlq.size().unwrap(), 0);
    }

    #[test]
    fn filter_by_class_and_error_pattern() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("version mismatch"), None)
            .unwrap();
        let mut other = header();
        other.message_class = "PaymentFailed".to_string();
        dlq.enqueue(other, b"{}", "json", ErrorInfo::new("decode_failure"), None)
            .unwrap();

        assert_eq!(dlq.filter_by_class("OrderCreated").unwrap().len(), 1);
        let pattern = Regex::new("version").unwrap();
        assert_eq!(dlq.filter_by_error_pattern(&pattern).unwrap().len(), 1);
    }

    #[test]
    fn statistics_aggregate_by_class_and_error() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("boom"), None).unwrap();
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("boom"), None).unwrap();

        let stats = dlq.statistics().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_class["OrderCreated"], 2);
        assert_eq!(stats.by_error["boom"], 2);
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        let dlq = DeadLetterQueue::new(&path).unwrap();
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("boom"), None).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "not valid json").unwrap();
        }
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("boom-2"), None).unwrap();

        assert_eq!(dlq.size().unwrap(), 2);
    }

    struct RecordingTarget {
        calls: AtomicUsize,
        fail_until: usize,
        last_payload: StdMutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl ReplayTarget for RecordingTarget {
        async fn publish_replay(&self, _header: &Header, payload_bytes: &[u8]) -> Result<(), SmartMessageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload_bytes.to_vec());
            if call < self.fail_until {
                Err(SmartMessageError::Other("replay target unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn replay_one_on_success_removes_entry() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        dlq.enqueue(
            header(),
            br#"{"order_id":"O1","amount":9.99,"customer":"c1"}"#,
            "json",
            ErrorInfo::new("handler failed"),
            Some("in_process".into()),
        )
        .unwrap();

        let target = RecordingTarget {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            last_payload: StdMutex::new(None),
        };
        let outcome = dlq.replay_one(&target).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Replayed));
        assert_eq!(dlq.size().unwrap(), 0);
    }

    #[tokio::test]
    async fn replay_one_on_failure_reenqueues_with_incremented_retry_count() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("handler failed"), None)
            .unwrap();

        let target = RecordingTarget {
            calls: AtomicUsize::new(0),
            fail_until: 10,
            last_payload: StdMutex::new(None),
        };
        let outcome = dlq.replay_one(&target).await.unwrap();
        assert!(matches!(outcome, ReplayOutcome::Failed { .. }));
        assert_eq!(dlq.size().unwrap(), 1);
        let entry = dlq.peek().unwrap().unwrap();
        assert_eq!(entry.retry_count, 1);
    }

    #[tokio::test]
    async fn replay_all_drains_the_queue() {
        let dir = tempdir().unwrap();
        let dlq = DeadLetterQueue::new(dir.path().join("dlq.jsonl")).unwrap();
        for _ in 0..3 {
            dlq.enqueue(header(), b"{}", "json", ErrorInfo::new("boom"), None).unwrap();
        }
        let target = RecordingTarget {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            last_payload: StdMutex::new(None),
        };
        let outcomes = dlq.replay_all(&target).await.unwrap();
        assert_eq!(outcomes.iter().filter(|o| matches!(o, ReplayOutcome::Replayed)).count(), 3);
        assert_eq!(dlq.size().unwrap(), 0);
    }
}
