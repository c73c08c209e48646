//! HistoryLog - 操作履歴の JSON ログ
//!
//! EventSink として全ドメインイベントを `{ timestamp, action, category, details }`
//! の形で追記し、毎回ファイルに保存します。読み込み・保存の失敗は warn! に
//! 記録するだけで、元の操作は失敗させません。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::DomainEvent;
use crate::impls::file_backend::write_atomic;
use crate::ports::{Clock, EventSink, SystemClock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub category: String,
    pub details: serde_json::Value,
}

impl HistoryEntry {
    fn mentions(&self, needle: &str) -> bool {
        self.action.to_lowercase().contains(needle)
            || self.details.to_string().to_lowercase().contains(needle)
    }
}

pub struct HistoryLog {
    path: PathBuf,
    entries: Mutex<Vec<HistoryEntry>>,
    clock: Arc<dyn Clock>,
}

impl HistoryLog {
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    /// Load existing entries. An unreadable file starts an empty history.
    pub async fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "history file unreadable, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(
        &self,
        action: impl Into<String>,
        category: impl Into<String>,
        details: serde_json::Value,
    ) {
        let entry = HistoryEntry {
            timestamp: self.clock.now(),
            action: action.into(),
            category: category.into(),
            details,
        };
        let mut entries = self.entries.lock().await;
        entries.push(entry);
        self.persist(&entries).await;
    }

    /// The newest `limit` entries (all when `None`), optionally of one category, oldest first.
    pub async fn entries(&self, limit: Option<usize>, category: Option<&str>) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().await;
        let filtered: Vec<HistoryEntry> = entries
            .iter()
            .filter(|e| category.is_none_or(|c| e.category == c))
            .cloned()
            .collect();
        match limit {
            Some(n) if n < filtered.len() => filtered[filtered.len() - n..].to_vec(),
            _ => filtered,
        }
    }

    pub async fn latest(&self) -> Option<HistoryEntry> {
        self.entries.lock().await.last().cloned()
    }

    /// Case-insensitive match on action or details.
    pub async fn search(&self, keyword: &str) -> Vec<HistoryEntry> {
        let needle = keyword.to_lowercase();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.mentions(&needle))
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await;
    }

    async fn persist(&self, entries: &[HistoryEntry]) {
        let bytes = match serde_json::to_vec_pretty(entries) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "could not encode history");
                return;
            }
        };
        if let Err(err) = write_atomic(&self.path, &bytes).await {
            warn!(path = %self.path.display(), error = %err, "could not save history");
        }
    }
}

#[async_trait]
impl EventSink for HistoryLog {
    async fn emit(&self, event: &DomainEvent) {
        let details = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        self.append(event.action(), event.category(), details).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskStatus};
    use tempfile::TempDir;
    use ulid::Ulid;

    fn status_event(to: TaskStatus) -> DomainEvent {
        DomainEvent::StatusChanged {
            task_id: TaskId::from_ulid(Ulid::new()),
            from: TaskStatus::Pending,
            to,
        }
    }

    #[tokio::test]
    async fn events_are_logged_and_reloaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let log = HistoryLog::open(&path).await;
        log.emit(&status_event(TaskStatus::Doing)).await;
        log.emit(&DomainEvent::TasksReordered { order: vec![] }).await;

        let reopened = HistoryLog::open(&path).await;
        let entries = reopened.entries(None, None).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "status_changed");
        assert_eq!(entries[0].category, "execution");
        assert_eq!(entries[0].details["to"], "doing");
        assert_eq!(reopened.latest().await.unwrap().action, "tasks_reordered");
    }

    #[tokio::test]
    async fn limit_keeps_newest_and_category_filters() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json")).await;
        for to in [TaskStatus::Doing, TaskStatus::Completed, TaskStatus::Failed] {
            log.emit(&status_event(to)).await;
        }
        log.append("note", "user", serde_json::json!({ "text": "hello" })).await;

        let last_two = log.entries(Some(2), None).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].action, "note");

        let execution = log.entries(Some(10), Some("execution")).await;
        assert_eq!(execution.len(), 3);
        assert_eq!(execution[2].details["to"], "failed");
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path().join("history.json")).await;
        log.append("note", "user", serde_json::json!({ "text": "Fleet Card" })).await;
        log.emit(&status_event(TaskStatus::Doing)).await;

        assert_eq!(log.search("fleet").await.len(), 1);
        assert_eq!(log.search("STATUS").await.len(), 1);
        assert!(log.search("nothing").await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_memory_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let log = HistoryLog::open(&path).await;
        log.emit(&status_event(TaskStatus::Doing)).await;

        log.clear().await;

        assert!(log.latest().await.is_none());
        assert!(HistoryLog::open(&path).await.entries(None, None).await.is_empty());
    }

    #[tokio::test]
    async fn garbage_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[[[").unwrap();

        let log = HistoryLog::open(&path).await;
        assert!(log.entries(None, None).await.is_empty());
    }
}
