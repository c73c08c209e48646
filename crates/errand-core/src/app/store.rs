//! TaskStore - タスクの正本（順序付きリスト）
//!
//! # 設計原則
//! - ローカル状態は backend が `Success` を返した時だけ変更する（push-then-confirm）
//! - Mutex は backend 呼び出しの await をまたいで保持しない
//! - run 中は構造変更（add / delete / reorder / reset）を `Busy` で拒否する
//! - status の変更は scheduler 専用（`set_status` は crate 内部のみ）

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::app::bus::EventBus;
use crate::app::sync::PersistenceSync;
use crate::domain::{DomainEvent, ErrandError, NewTask, Task, TaskId, TaskPatch, TaskStatus};

/// Single-flight claim on the store. Dropping it returns the store to Idle.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct TaskStore {
    tasks: Mutex<Vec<Task>>,
    sync: PersistenceSync,
    bus: EventBus,
    running: Arc<AtomicBool>,
}

impl TaskStore {
    pub fn new(sync: PersistenceSync, bus: EventBus) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            sync,
            bus,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current tasks in position order.
    pub async fn list(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().await.iter().find(|t| t.id == id).cloned()
    }

    pub async fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.lock().await.iter().position(|t| t.id == id)
    }

    pub async fn ids(&self) -> Vec<TaskId> {
        self.tasks.lock().await.iter().map(|t| t.id).collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.bus.subscribe()
    }

    /// Validate, ask the backend to create, then append the confirmed task as `Pending`.
    pub async fn add(&self, new: NewTask) -> Result<Task, ErrandError> {
        new.validate()?;
        self.ensure_idle()?;

        let mut task = self.sync.create(&new).await?;
        task.status = TaskStatus::Pending;

        let position = {
            let mut tasks = self.tasks.lock().await;
            if tasks.iter().any(|existing| existing.id == task.id) {
                return Err(ErrandError::persistence(
                    "add",
                    format!("backend returned duplicate id {}", task.id),
                ));
            }
            tasks.push(task.clone());
            tasks.len() - 1
        };

        info!(task_id = %task.id, target = %task.target, position, "task added");
        self.bus
            .publish(DomainEvent::TaskAdded {
                task: task.clone(),
                position,
            })
            .await;
        Ok(task)
    }

    /// Apply `patch` once the backend accepts it. `id` and `status` are kept.
    pub async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, ErrandError> {
        let current = self.get(id).await.ok_or(ErrandError::NotFound(id))?;
        if current.status == TaskStatus::Doing {
            return Err(ErrandError::Busy);
        }
        let proposed = current.patched(patch);
        proposed.validate()?;

        self.sync.update(&proposed).await?;

        let updated = {
            let mut tasks = self.tasks.lock().await;
            let slot = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(ErrandError::NotFound(id))?;
            *slot = slot.patched(patch);
            slot.clone()
        };

        info!(task_id = %id, "task updated");
        self.bus
            .publish(DomainEvent::TaskUpdated {
                task: updated.clone(),
            })
            .await;
        Ok(updated)
    }

    /// Remove the task once the backend confirms. Results are not touched here.
    pub async fn delete(&self, id: TaskId) -> Result<(), ErrandError> {
        self.ensure_idle()?;
        if self.position(id).await.is_none() {
            return Err(ErrandError::NotFound(id));
        }

        self.sync.delete(id).await?;

        self.tasks.lock().await.retain(|t| t.id != id);

        info!(task_id = %id, "task deleted");
        self.bus.publish(DomainEvent::TaskDeleted { task_id: id }).await;
        Ok(())
    }

    /// Replace the order. `new_order` must be a permutation of the current ids.
    pub async fn reorder(&self, new_order: &[TaskId]) -> Result<(), ErrandError> {
        self.ensure_idle()?;

        {
            let mut tasks = self.tasks.lock().await;
            let mut seen = HashSet::with_capacity(new_order.len());
            for id in new_order {
                if !tasks.iter().any(|t| t.id == *id) {
                    return Err(ErrandError::UnknownId(*id));
                }
                if !seen.insert(*id) {
                    return Err(ErrandError::validation(format!("duplicate id in order: {id}")));
                }
            }
            if new_order.len() != tasks.len() {
                return Err(ErrandError::validation(format!(
                    "order names {} of {} tasks",
                    new_order.len(),
                    tasks.len()
                )));
            }
            tasks.sort_by_key(|t| new_order.iter().position(|id| *id == t.id));
        }

        info!(count = new_order.len(), "tasks reordered");
        self.bus
            .publish(DomainEvent::TasksReordered {
                order: new_order.to_vec(),
            })
            .await;
        Ok(())
    }

    /// Move a `Completed` or `Failed` task back to `Pending`. Returns whether it changed.
    pub async fn reset(&self, id: TaskId) -> Result<bool, ErrandError> {
        self.ensure_idle()?;
        let from = {
            let mut tasks = self.tasks.lock().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(ErrandError::NotFound(id))?;
            if !task.status.is_terminal() {
                return Ok(false);
            }
            std::mem::replace(&mut task.status, TaskStatus::Pending)
        };

        self.publish_status(id, from, TaskStatus::Pending).await;
        self.bus
            .publish(DomainEvent::TasksReset { task_ids: vec![id] })
            .await;
        Ok(true)
    }

    /// Reset every finished task. Returns the ids that changed.
    pub async fn reset_all(&self) -> Result<Vec<TaskId>, ErrandError> {
        self.ensure_idle()?;
        let changed: Vec<(TaskId, TaskStatus)> = {
            let mut tasks = self.tasks.lock().await;
            tasks
                .iter_mut()
                .filter(|t| t.status.is_terminal())
                .map(|t| (t.id, std::mem::replace(&mut t.status, TaskStatus::Pending)))
                .collect()
        };
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        for (id, from) in &changed {
            self.publish_status(*id, *from, TaskStatus::Pending).await;
        }
        let task_ids: Vec<TaskId> = changed.into_iter().map(|(id, _)| id).collect();
        info!(count = task_ids.len(), "tasks reset");
        self.bus
            .publish(DomainEvent::TasksReset {
                task_ids: task_ids.clone(),
            })
            .await;
        Ok(task_ids)
    }

    // ========================================
    // scheduler / facade 専用
    // ========================================

    pub(crate) fn begin_run(&self) -> Result<RunGuard, ErrandError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ErrandError::AlreadyRunning)?;
        Ok(RunGuard {
            running: self.running.clone(),
        })
    }

    /// Ids of `Pending` tasks in position order.
    pub(crate) async fn pending_ids(&self) -> Vec<TaskId> {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|t| t.status.is_runnable())
            .map(|t| t.id)
            .collect()
    }

    /// Move a task along its lifecycle. Not routed through the backend.
    pub(crate) async fn set_status(&self, id: TaskId, to: TaskStatus) -> Result<TaskStatus, ErrandError> {
        let from = {
            let mut tasks = self.tasks.lock().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(ErrandError::NotFound(id))?;
            if !task.status.can_transition_to(to) {
                return Err(ErrandError::validation(format!(
                    "cannot move {id} from {} to {to}",
                    task.status
                )));
            }
            std::mem::replace(&mut task.status, to)
        };

        self.publish_status(id, from, to).await;
        Ok(from)
    }

    /// Replace the local list with freshly loaded tasks, all `Pending`.
    /// Refused with `Busy` during a run. A repeated id keeps its first occurrence.
    pub(crate) async fn load(&self, tasks: Vec<Task>) -> Result<(), ErrandError> {
        self.ensure_idle()?;

        let mut seen = HashSet::with_capacity(tasks.len());
        let tasks: Vec<Task> = tasks
            .into_iter()
            .filter(|task| {
                let first = seen.insert(task.id);
                if !first {
                    warn!(task_id = %task.id, "duplicate task id in backend listing, dropped");
                }
                first
            })
            .map(|task| Task {
                status: TaskStatus::Pending,
                ..task
            })
            .collect();
        info!(count = tasks.len(), "tasks loaded");
        *self.tasks.lock().await = tasks;
        Ok(())
    }

    pub(crate) async fn publish(&self, event: DomainEvent) {
        self.bus.publish(event).await;
    }

    async fn publish_status(&self, task_id: TaskId, from: TaskStatus, to: TaskStatus) {
        debug!(task_id = %task_id, %from, %to, "status changed");
        self.bus
            .publish(DomainEvent::StatusChanged { task_id, from, to })
            .await;
    }

    fn ensure_idle(&self) -> Result<(), ErrandError> {
        if self.is_running() {
            return Err(ErrandError::Busy);
        }
        Ok(())
    }
}
