//! Errors - エラー型と分類
//!
//! すべての操作はこの enum を `Result` で返します。executor の失敗は
//! エラーではなく `TaskResult` として記録されます。

use thiserror::Error;

use super::ids::TaskId;

/// ErrorKind はホスト側の表示用の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any backend call.
    Validation,
    /// The id does not name a task.
    NotFound,
    /// The backend refused or could not be reached.
    Persistence,
    /// A run is active (or another run was requested).
    Concurrency,
    /// Nothing to run.
    EmptyQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrandError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("unknown id in order: {0}")]
    UnknownId(TaskId),

    #[error("failed to {operation} task: {reason}")]
    Persistence {
        operation: &'static str,
        reason: String,
    },

    #[error("a run is in progress")]
    Busy,

    #[error("no pending tasks to run")]
    EmptyQueue,

    #[error("a run is already active")]
    AlreadyRunning,

    #[error("errand has not been initialized")]
    NotInitialized,
}

impl ErrandError {
    pub fn validation(message: impl Into<String>) -> Self {
        ErrandError::Validation(message.into())
    }

    pub fn persistence(operation: &'static str, reason: impl Into<String>) -> Self {
        ErrandError::Persistence {
            operation,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrandError::Validation(_) => ErrorKind::Validation,
            ErrandError::NotFound(_) | ErrandError::UnknownId(_) => ErrorKind::NotFound,
            ErrandError::Persistence { .. } | ErrandError::NotInitialized => {
                ErrorKind::Persistence
            }
            ErrandError::Busy | ErrandError::AlreadyRunning => ErrorKind::Concurrency,
            ErrandError::EmptyQueue => ErrorKind::EmptyQueue,
        }
    }
}
