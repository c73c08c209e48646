//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskStatus はタスクの状態を表現
///
/// # 状態遷移
/// - Pending -> Doing -> Completed
/// - Pending -> Doing -> Failed
/// - Completed / Failed -> Pending（明示的な reset のみ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for the next run.
    #[default]
    Pending,

    /// Currently handed to the executor.
    Doing,

    /// Every invocation in the last run succeeded.
    Completed,

    /// At least one invocation in the last run failed.
    Failed,
}

impl TaskStatus {
    /// Is this a terminal state for the current run?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is this task eligible for a run snapshot?
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Doing)
                | (TaskStatus::Doing, TaskStatus::Completed)
                | (TaskStatus::Doing, TaskStatus::Failed)
                | (TaskStatus::Completed, TaskStatus::Pending)
                | (TaskStatus::Failed, TaskStatus::Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Doing => "doing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Pending, TaskStatus::Doing, true)]
    #[case(TaskStatus::Doing, TaskStatus::Completed, true)]
    #[case(TaskStatus::Doing, TaskStatus::Failed, true)]
    #[case(TaskStatus::Completed, TaskStatus::Pending, true)]
    #[case(TaskStatus::Failed, TaskStatus::Pending, true)]
    #[case(TaskStatus::Pending, TaskStatus::Completed, false)]
    #[case(TaskStatus::Doing, TaskStatus::Doing, false)]
    #[case(TaskStatus::Completed, TaskStatus::Doing, false)]
    #[case(TaskStatus::Failed, TaskStatus::Doing, false)]
    #[case(TaskStatus::Doing, TaskStatus::Pending, false)]
    fn transitions(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&TaskStatus::Doing).unwrap();
        assert_eq!(s, "\"doing\"");
        let back: TaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, TaskStatus::Failed);
    }

    #[test]
    fn only_pending_is_runnable() {
        assert!(TaskStatus::Pending.is_runnable());
        assert!(!TaskStatus::Doing.is_runnable());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(!TaskStatus::Doing.is_terminal());
    }
}
