//! InMemoryBackend - 開発用・テスト用の PersistenceBackend
//!
//! # 学習ポイント
//! - 動詞ごとの失敗注入（`fail_next`）で push-then-confirm を検証する
//! - 呼び出し回数の記録（1 操作 = 1 backend 呼び出し）
//!
//! status はセッション内の状態なので、保存時は常に Pending に戻します。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, SyncOutcome, Task, TaskId, TaskStatus};
use crate::ports::{Clock, IdGenerator, PersistenceBackend, SystemClock, UlidGenerator};

/// Backend call kinds, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Ready,
    List,
    Create,
    Update,
    Delete,
    SaveOrder,
}

#[derive(Default)]
struct State {
    tasks: Vec<Task>,
    failures: HashMap<Verb, VecDeque<String>>,
    calls: HashMap<Verb, usize>,
}

impl State {
    /// Count the call and pop an injected failure, if any.
    fn enter(&mut self, verb: Verb) -> Option<String> {
        *self.calls.entry(verb).or_default() += 1;
        self.failures.get_mut(&verb).and_then(VecDeque::pop_front)
    }
}

pub struct InMemoryBackend {
    state: Mutex<State>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(UlidGenerator::new(SystemClock)), Arc::new(SystemClock))
    }

    pub fn with_parts(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids,
            clock,
        }
    }

    /// Pre-populate storage, as if loaded from an earlier session.
    pub async fn seed(&self, new: NewTask) -> Task {
        let task = Task::from_new(self.ids.generate_task_id(), new, self.clock.now());
        self.state.lock().await.tasks.push(task.clone());
        task
    }

    /// Make the next call of `verb` report failure with `reason`. Queues if called repeatedly.
    pub async fn fail_next(&self, verb: Verb, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .failures
            .entry(verb)
            .or_default()
            .push_back(reason.into());
    }

    pub async fn calls(&self, verb: Verb) -> usize {
        self.state.lock().await.calls.get(&verb).copied().unwrap_or(0)
    }

    pub async fn stored(&self) -> Vec<Task> {
        self.state.lock().await.tasks.clone()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryBackend {
    async fn ready(&self) -> SyncOutcome<()> {
        match self.state.lock().await.enter(Verb::Ready) {
            Some(reason) => SyncOutcome::failure(reason),
            None => SyncOutcome::success(()),
        }
    }

    async fn list_tasks(&self) -> SyncOutcome<Vec<Task>> {
        let mut state = self.state.lock().await;
        match state.enter(Verb::List) {
            Some(reason) => SyncOutcome::failure(reason),
            None => SyncOutcome::success(state.tasks.clone()),
        }
    }

    async fn create_task(&self, new: &NewTask) -> SyncOutcome<Task> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.enter(Verb::Create) {
            return SyncOutcome::failure(reason);
        }
        let task = Task::from_new(self.ids.generate_task_id(), new.clone(), self.clock.now());
        state.tasks.push(task.clone());
        SyncOutcome::success(task)
    }

    async fn update_task(&self, task: &Task) -> SyncOutcome<()> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.enter(Verb::Update) {
            return SyncOutcome::failure(reason);
        }
        match state.tasks.iter_mut().find(|stored| stored.id == task.id) {
            Some(stored) => {
                *stored = Task {
                    status: TaskStatus::Pending,
                    ..task.clone()
                };
                SyncOutcome::success(())
            }
            None => SyncOutcome::failure(format!("no such task: {}", task.id)),
        }
    }

    async fn delete_task(&self, id: TaskId) -> SyncOutcome<()> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.enter(Verb::Delete) {
            return SyncOutcome::failure(reason);
        }
        let before = state.tasks.len();
        state.tasks.retain(|stored| stored.id != id);
        if state.tasks.len() == before {
            return SyncOutcome::failure(format!("no such task: {id}"));
        }
        SyncOutcome::success(())
    }

    async fn save_order(&self, order: &[TaskId]) -> SyncOutcome<()> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.enter(Verb::SaveOrder) {
            return SyncOutcome::failure(reason);
        }
        // unknown ids sort last, keeping their relative order
        state.tasks.sort_by_key(|task| {
            order
                .iter()
                .position(|id| *id == task.id)
                .unwrap_or(usize::MAX)
        });
        SyncOutcome::success(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_mints_distinct_ids() {
        let backend = InMemoryBackend::new();
        let a = backend.create_task(&NewTask::new("a.com", "q1")).await;
        let b = backend.create_task(&NewTask::new("b.com", "q2")).await;

        let (SyncOutcome::Success { data: a }, SyncOutcome::Success { data: b }) = (a, b) else {
            panic!("create failed");
        };
        assert_ne!(a.id, b.id);
        assert_eq!(backend.stored().await.len(), 2);
        assert_eq!(backend.calls(Verb::Create).await, 2);
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let backend = InMemoryBackend::new();
        backend.fail_next(Verb::Create, "quota exceeded").await;

        let first = backend.create_task(&NewTask::new("a.com", "q")).await;
        assert_eq!(first, SyncOutcome::failure("quota exceeded"));
        assert!(backend.stored().await.is_empty());

        let second = backend.create_task(&NewTask::new("a.com", "q")).await;
        assert!(second.is_success());
    }

    #[tokio::test]
    async fn update_does_not_store_status() {
        let backend = InMemoryBackend::new();
        let mut task = backend.seed(NewTask::new("a.com", "q")).await;
        task.status = TaskStatus::Completed;
        task.query = "q2".to_string();

        assert!(backend.update_task(&task).await.is_success());

        let stored = &backend.stored().await[0];
        assert_eq!(stored.query, "q2");
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn save_order_rearranges_storage() {
        let backend = InMemoryBackend::new();
        let a = backend.seed(NewTask::new("a.com", "q")).await;
        let b = backend.seed(NewTask::new("b.com", "q")).await;

        assert!(backend.save_order(&[b.id, a.id]).await.is_success());

        let ids: Vec<_> = backend.stored().await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
