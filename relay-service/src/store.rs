//! Persistent config flag and outcome log.
//!
//! The relay reads the enabled flag before every event and appends one
//! [`LogRecord`] per classified event. Implementations serialize their own
//! mutations; callers never hold a lock across calls.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::dispatch::{DispatchOutcome, DispatchReport};
use crate::error::StoreError;
use crate::event::CanonicalEvent;

/// Log records kept when no explicit cap is given. Older records are dropped.
pub const DEFAULT_MAX_LOG_RECORDS: usize = 5000;

/// Administratively controlled relay switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub enabled: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One forwarding attempt, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event: CanonicalEvent,
    pub conversions_status: DispatchOutcome,
    pub measurement_status: DispatchOutcome,
}

impl LogRecord {
    pub fn new(event: CanonicalEvent, report: DispatchReport) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            conversions_status: report.conversions,
            measurement_status: report.measurement,
        }
    }
}

#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn read_config(&self) -> Result<RelayConfig, StoreError>;

    async fn set_enabled(&self, enabled: bool) -> Result<RelayConfig, StoreError>;

    /// Flip the enabled flag atomically and return the new config.
    async fn toggle_enabled(&self) -> Result<RelayConfig, StoreError>;

    async fn append_log(&self, record: LogRecord) -> Result<(), StoreError>;

    /// The last `limit` records, newest first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError>;
}

/// Everything the store holds, as laid out on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub config: RelayConfig,
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

impl StoreDocument {
    fn recent(&self, limit: usize) -> Vec<LogRecord> {
        self.logs.iter().rev().take(limit).cloned().collect()
    }

    fn push_log(&mut self, record: LogRecord, max_records: usize) {
        self.logs.push(record);
        self.truncate_logs(max_records);
    }

    /// Keep only the newest `max_records` records.
    fn truncate_logs(&mut self, max_records: usize) {
        if self.logs.len() > max_records {
            let excess = self.logs.len() - max_records;
            self.logs.drain(..excess);
        }
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Debug)]
pub struct InMemoryStore {
    doc: Mutex<StoreDocument>,
    max_records: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            doc: Mutex::new(StoreDocument::default()),
            max_records: DEFAULT_MAX_LOG_RECORDS,
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            doc: Mutex::new(StoreDocument {
                config: RelayConfig { enabled },
                logs: Vec::new(),
            }),
            ..Self::default()
        }
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// All records in insertion order.
    pub async fn logs(&self) -> Vec<LogRecord> {
        self.doc.lock().await.logs.clone()
    }
}

#[async_trait]
impl RelayStore for InMemoryStore {
    async fn read_config(&self) -> Result<RelayConfig, StoreError> {
        Ok(self.doc.lock().await.config)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<RelayConfig, StoreError> {
        let mut doc = self.doc.lock().await;
        doc.config.enabled = enabled;
        Ok(doc.config)
    }

    async fn toggle_enabled(&self) -> Result<RelayConfig, StoreError> {
        let mut doc = self.doc.lock().await;
        doc.config.enabled = !doc.config.enabled;
        Ok(doc.config)
    }

    async fn append_log(&self, record: LogRecord) -> Result<(), StoreError> {
        self.doc.lock().await.push_log(record, self.max_records);
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.doc.lock().await.recent(limit))
    }
}

// =============================================================================
// JSON file store
// =============================================================================

/// Keeps the whole document in memory and rewrites the file on every change.
///
/// Writes go to a sibling temp file that is then renamed over the original,
/// so a crash mid-write leaves the previous document intact. At most
/// `max_records` log records are kept, which bounds the cost of each rewrite.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
    max_records: usize,
}

impl JsonFileStore {
    /// Load the document at `path`, starting empty (and enabled) if it does not exist.
    pub async fn open(path: impl AsRef<Path>, max_records: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let mut doc: StoreDocument = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        doc.truncate_logs(max_records);

        info!(
            path = %path.display(),
            enabled = doc.config.enabled,
            log_count = doc.logs.len(),
            max_records = max_records,
            "store_opened"
        );

        Ok(Self {
            path,
            doc: Mutex::new(doc),
            max_records,
        })
    }

    /// Apply `mutate` to a copy, persist it, then commit it in memory.
    async fn update<F>(&self, mutate: F) -> Result<RelayConfig, StoreError>
    where
        F: FnOnce(&mut StoreDocument) + Send,
    {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        mutate(&mut next);
        self.persist(&next).await?;
        *doc = next;
        Ok(doc.config)
    }

    async fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RelayStore for JsonFileStore {
    async fn read_config(&self) -> Result<RelayConfig, StoreError> {
        Ok(self.doc.lock().await.config)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<RelayConfig, StoreError> {
        self.update(|doc| doc.config.enabled = enabled).await
    }

    async fn toggle_enabled(&self) -> Result<RelayConfig, StoreError> {
        self.update(|doc| doc.config.enabled = !doc.config.enabled).await
    }

    async fn append_log(&self, record: LogRecord) -> Result<(), StoreError> {
        let max_records = self.max_records;
        self.update(move |doc| doc.push_log(record, max_records)).await?;
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.doc.lock().await.recent(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: CanonicalEvent, conversions: DispatchOutcome) -> LogRecord {
        LogRecord::new(
            event,
            DispatchReport {
                conversions,
                measurement: DispatchOutcome::Status(204),
            },
        )
    }

    #[test]
    fn test_log_record_json_shape() {
        let rec = record(CanonicalEvent::Purchase, DispatchOutcome::Error { status: Some(500) });
        let json = serde_json::to_value(&rec).unwrap();

        assert_eq!(json["type"], "Purchase");
        assert_eq!(json["conversions_status"], "error");
        assert_eq!(json["measurement_status"], 204);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_in_memory_defaults_to_enabled() {
        let store = InMemoryStore::new();
        assert!(store.read_config().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_in_memory_toggle_and_set() {
        let store = InMemoryStore::new();
        assert!(!store.toggle_enabled().await.unwrap().enabled);
        assert!(store.toggle_enabled().await.unwrap().enabled);
        assert!(!store.set_enabled(false).await.unwrap().enabled);
        assert!(!store.read_config().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first() {
        let store = InMemoryStore::new();
        store.append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(200))).await.unwrap();
        store.append_log(record(CanonicalEvent::Purchase, DispatchOutcome::Status(200))).await.unwrap();
        store.append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(201))).await.unwrap();

        let recent = store.recent_logs(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].conversions_status, DispatchOutcome::Status(201));
        assert_eq!(recent[1].event, CanonicalEvent::Purchase);

        assert_eq!(store.logs().await.len(), 3);
        assert_eq!(store.recent_logs(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_json_file_store_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json"), DEFAULT_MAX_LOG_RECORDS).await.unwrap();

        assert!(store.read_config().await.unwrap().enabled);
        assert!(store.recent_logs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path, DEFAULT_MAX_LOG_RECORDS).await.unwrap();
            store.append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(200))).await.unwrap();
            store
                .append_log(record(CanonicalEvent::Purchase, DispatchOutcome::Error { status: None }))
                .await
                .unwrap();
            store.set_enabled(false).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path, DEFAULT_MAX_LOG_RECORDS).await.unwrap();
        assert!(!reopened.read_config().await.unwrap().enabled);

        let recent = reopened.recent_logs(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, CanonicalEvent::Purchase);
        assert_eq!(recent[0].conversions_status, DispatchOutcome::Error { status: None });
        assert_eq!(recent[1].event, CanonicalEvent::Lead);
    }

    #[tokio::test]
    async fn test_in_memory_drops_oldest_past_cap() {
        let store = InMemoryStore::new().with_max_records(3);
        for code in 200..205 {
            store.append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(code))).await.unwrap();
        }

        let logs = store.logs().await;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].conversions_status, DispatchOutcome::Status(202));

        let recent = store.recent_logs(10).await.unwrap();
        assert_eq!(recent[0].conversions_status, DispatchOutcome::Status(204));
        assert_eq!(recent[2].conversions_status, DispatchOutcome::Status(202));
    }

    #[tokio::test]
    async fn test_json_file_store_keeps_only_newest_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path, 3).await.unwrap();
            for code in 200..205 {
                store.append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(code))).await.unwrap();
            }

            let recent = store.recent_logs(10).await.unwrap();
            assert_eq!(recent.len(), 3);
            assert_eq!(recent[0].conversions_status, DispatchOutcome::Status(204));
        }

        let reopened = JsonFileStore::open(&path, 3).await.unwrap();
        let recent = reopened.recent_logs(10).await.unwrap();
        let codes: Vec<_> = recent.iter().map(|r| r.conversions_status).collect();
        assert_eq!(
            codes,
            vec![
                DispatchOutcome::Status(204),
                DispatchOutcome::Status(203),
                DispatchOutcome::Status(202),
            ]
        );

        // A smaller cap trims an existing document on open
        let shrunk = JsonFileStore::open(&path, 1).await.unwrap();
        let recent = shrunk.recent_logs(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].conversions_status, DispatchOutcome::Status(204));
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = JsonFileStore::open(&path, DEFAULT_MAX_LOG_RECORDS).await;
        assert!(matches!(result, Err(StoreError::Serde(_))));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::open(dir.path().join("s.json"), DEFAULT_MAX_LOG_RECORDS).await.unwrap());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_log(record(CanonicalEvent::Lead, DispatchOutcome::Status(200)))
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        assert_eq!(store.recent_logs(100).await.unwrap().len(), 10);
    }
}
