//! PersistenceBackend port - タスクの永続化
//!
//! core が必要とするのは CRUD の契約だけです。ストレージエンジン（ファイル、
//! DB など）は実装側に隠蔽されます。
//!
//! # 設計原則
//! - 各メソッドは `SyncOutcome` を返す（成功 / 失敗の判別共用体）
//! - core は `Success` を受け取った時だけローカル状態を変更する
//! - status はセッション内の状態であり、backend に保存を依頼しない

use async_trait::async_trait;

use crate::domain::{NewTask, SyncOutcome, Task, TaskId};

#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Resolves once the backend is usable. Awaited once by `Errand::init`.
    async fn ready(&self) -> SyncOutcome<()> {
        SyncOutcome::success(())
    }

    /// All stored tasks in persisted order.
    async fn list_tasks(&self) -> SyncOutcome<Vec<Task>>;

    /// Store a new task and mint its id. The returned task is appended locally as-is.
    async fn create_task(&self, new: &NewTask) -> SyncOutcome<Task>;

    async fn update_task(&self, task: &Task) -> SyncOutcome<()>;

    async fn delete_task(&self, id: TaskId) -> SyncOutcome<()>;

    /// Best-effort persistence of the display order.
    async fn save_order(&self, _order: &[TaskId]) -> SyncOutcome<()> {
        SyncOutcome::success(())
    }
}
