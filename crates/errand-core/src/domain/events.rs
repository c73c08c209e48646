//! Events - ドメインイベント
//!
//! 観測可能な状態変化はすべて DomainEvent として EventSink に流れます。
//! UI は broadcast を購読して run の進捗をリアルタイムに表示します。

use serde::{Deserialize, Serialize};

use super::ids::{RunId, TaskId};
use super::result::UntrustedText;
use super::state::TaskStatus;
use super::task::Task;

/// Aggregate counts for one finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    /// Tasks handed to the executor.
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Snapshotted tasks that were deleted or no longer pending when their turn came.
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskAdded {
        task: Task,
        position: usize,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        task_id: TaskId,
    },
    TasksReordered {
        order: Vec<TaskId>,
    },
    TasksReset {
        task_ids: Vec<TaskId>,
    },
    StatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    ResultRecorded {
        task_id: TaskId,
        run_id: RunId,
        sequence_index: u64,
        succeeded: bool,
        payload: UntrustedText,
    },
    RunStarted {
        run_id: RunId,
        task_count: usize,
    },
    RunFinished {
        summary: RunSummary,
    },
}

impl RunSummary {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            attempted: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
        }
    }
}

impl DomainEvent {
    /// Stable action name (history log `action` field).
    pub fn action(&self) -> &'static str {
        match self {
            DomainEvent::TaskAdded { .. } => "task_added",
            DomainEvent::TaskUpdated { .. } => "task_updated",
            DomainEvent::TaskDeleted { .. } => "task_deleted",
            DomainEvent::TasksReordered { .. } => "tasks_reordered",
            DomainEvent::TasksReset { .. } => "tasks_reset",
            DomainEvent::StatusChanged { .. } => "status_changed",
            DomainEvent::ResultRecorded { .. } => "result_recorded",
            DomainEvent::RunStarted { .. } => "run_started",
            DomainEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// Coarse grouping (history log `category` field).
    pub fn category(&self) -> &'static str {
        match self {
            DomainEvent::TaskAdded { .. }
            | DomainEvent::TaskUpdated { .. }
            | DomainEvent::TaskDeleted { .. }
            | DomainEvent::TasksReordered { .. }
            | DomainEvent::TasksReset { .. } => "task",
            DomainEvent::StatusChanged { .. } | DomainEvent::ResultRecorded { .. } => "execution",
            DomainEvent::RunStarted { .. } | DomainEvent::RunFinished { .. } => "run",
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            DomainEvent::TaskAdded { task, .. } | DomainEvent::TaskUpdated { task } => {
                Some(task.id)
            }
            DomainEvent::TaskDeleted { task_id }
            | DomainEvent::StatusChanged { task_id, .. }
            | DomainEvent::ResultRecorded { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}
