//! JsonFileBackend - JSON ファイルに保存する PersistenceBackend
//!
//! # ファイル形式
//! ```json
//! { "tasks": [ { "id": "...", "target": "...", "query": "...", "loop_count": 1, "created_at": "..." } ] }
//! ```
//! 配列の順序が表示順です。status は保存しません（セッション内の状態）。
//!
//! 書き込みは隣の一時ファイルに書いてから rename します。IO / serde の
//! エラーは `SyncOutcome::Failure` として返し、panic しません。

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{NewTask, SyncOutcome, Task, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, PersistenceBackend, SystemClock, UlidGenerator};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTask {
    id: TaskId,
    target: String,
    query: String,
    #[serde(default = "one")]
    loop_count: u32,
    created_at: DateTime<Utc>,
}

fn one() -> u32 {
    1
}

impl From<&Task> for StoredTask {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            target: task.target.clone(),
            query: task.query.clone(),
            loop_count: task.loop_count,
            created_at: task.created_at,
        }
    }
}

impl From<StoredTask> for Task {
    fn from(stored: StoredTask) -> Self {
        Task {
            id: stored.id,
            target: stored.target,
            query: stored.query,
            status: TaskStatus::Pending,
            loop_count: stored.loop_count,
            created_at: stored.created_at,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    tasks: Vec<StoredTask>,
}

pub struct JsonFileBackend {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_parts(
            path,
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    pub fn with_parts(
        path: impl Into<PathBuf>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            ids,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Document, String> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| format!("{} is not a valid task file: {e}", self.path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(format!("cannot read {}: {e}", self.path.display())),
        }
    }

    async fn save(&self, doc: &Document) -> Result<(), String> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| e.to_string())?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| format!("cannot write {}: {e}", self.path.display()))?;
        debug!(path = %self.path.display(), count = doc.tasks.len(), "task file written");
        Ok(())
    }

    /// Load, apply `change`, save. `change` returns the value handed back on success.
    async fn modify<T>(
        &self,
        change: impl FnOnce(&mut Document) -> Result<T, String>,
    ) -> SyncOutcome<T> {
        let _held = self.lock.lock().await;
        let result: Result<T, String> = async {
            let mut doc = self.load().await?;
            let value = change(&mut doc)?;
            self.save(&doc).await?;
            Ok(value)
        }
        .await;

        match result {
            Ok(value) => SyncOutcome::success(value),
            Err(reason) => SyncOutcome::failure(reason),
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl PersistenceBackend for JsonFileBackend {
    async fn ready(&self) -> SyncOutcome<()> {
        let _held = self.lock.lock().await;
        match self.load().await {
            Ok(_) => SyncOutcome::success(()),
            Err(reason) => SyncOutcome::failure(reason),
        }
    }

    async fn list_tasks(&self) -> SyncOutcome<Vec<Task>> {
        let _held = self.lock.lock().await;
        match self.load().await {
            Ok(doc) => SyncOutcome::success(doc.tasks.into_iter().map(Task::from).collect()),
            Err(reason) => SyncOutcome::failure(reason),
        }
    }

    async fn create_task(&self, new: &NewTask) -> SyncOutcome<Task> {
        let task = Task::from_new(self.ids.generate_task_id(), new.clone(), self.clock.now());
        let stored = StoredTask::from(&task);
        self.modify(move |doc| {
            doc.tasks.push(stored);
            Ok(task)
        })
        .await
    }

    async fn update_task(&self, task: &Task) -> SyncOutcome<()> {
        let replacement = StoredTask::from(task);
        self.modify(move |doc| {
            let slot = doc
                .tasks
                .iter_mut()
                .find(|stored| stored.id == replacement.id)
                .ok_or_else(|| format!("no such task: {}", replacement.id))?;
            *slot = replacement;
            Ok(())
        })
        .await
    }

    async fn delete_task(&self, id: TaskId) -> SyncOutcome<()> {
        self.modify(move |doc| {
            let before = doc.tasks.len();
            doc.tasks.retain(|stored| stored.id != id);
            if doc.tasks.len() == before {
                return Err(format!("no such task: {id}"));
            }
            Ok(())
        })
        .await
    }

    async fn save_order(&self, order: &[TaskId]) -> SyncOutcome<()> {
        self.modify(|doc| {
            doc.tasks.sort_by_key(|stored| {
                order
                    .iter()
                    .position(|id| *id == stored.id)
                    .unwrap_or(usize::MAX)
            });
            Ok(())
        })
        .await
    }
}
