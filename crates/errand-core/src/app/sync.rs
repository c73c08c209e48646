//! PersistenceSync - push-then-confirm の backend 呼び出し
//!
//! # 設計原則
//! - CRUD の動詞ごとに 1 メソッド、各呼び出しは backend への 1 回の往復
//! - `SyncOutcome::Failure` とタイムアウトは `ErrandError::Persistence` になる
//! - リトライはしない（呼び出し側がユーザーに報告する）

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{ErrandError, NewTask, SyncOutcome, Task, TaskId};
use crate::ports::PersistenceBackend;

pub const UNREACHABLE: &str = "backend unreachable";

#[derive(Clone)]
pub struct PersistenceSync {
    backend: Arc<dyn PersistenceBackend>,
    timeout: Duration,
}

impl PersistenceSync {
    pub fn new(backend: Arc<dyn PersistenceBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn ready(&self) -> Result<(), ErrandError> {
        self.call("load", self.backend.ready()).await
    }

    pub async fn list(&self) -> Result<Vec<Task>, ErrandError> {
        self.call("load", self.backend.list_tasks()).await
    }

    pub async fn create(&self, new: &NewTask) -> Result<Task, ErrandError> {
        self.call("add", self.backend.create_task(new)).await
    }

    pub async fn update(&self, task: &Task) -> Result<(), ErrandError> {
        self.call("update", self.backend.update_task(task)).await
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), ErrandError> {
        self.call("delete", self.backend.delete_task(id)).await
    }

    pub async fn save_order(&self, order: &[TaskId]) -> Result<(), ErrandError> {
        self.call("reorder", self.backend.save_order(order)).await
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = SyncOutcome<T>>,
    ) -> Result<T, ErrandError> {
        let outcome = match tokio::time::timeout(self.timeout, request).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "backend call timed out");
                return Err(ErrandError::persistence(operation, UNREACHABLE));
            }
        };

        match &outcome {
            SyncOutcome::Success { .. } => debug!(operation, "backend confirmed"),
            SyncOutcome::Failure { reason } => {
                warn!(operation, error = %reason, "backend rejected request")
            }
        }
        outcome.into_result(operation)
    }
}
