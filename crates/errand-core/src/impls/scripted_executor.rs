//! ScriptedExecutor - 決定的な Executor（テスト用・dry-run 用）
//!
//! キューに積んだ outcome を順番に返し、空になったら `"{target}: {query}"` を
//! 成功として返します。すべての呼び出しを記録します。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::ExecutorOutcome;
use crate::ports::Executor;

#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ExecutorOutcome>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, outcome: ExecutorOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    /// `(target, query)` of every call so far.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, target: &str, query: &str) -> ExecutorOutcome {
        self.calls
            .lock()
            .await
            .push((target.to_string(), query.to_string()));

        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => ExecutorOutcome::success(format!("{target}: {query}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_come_first_then_echo() {
        let executor = ScriptedExecutor::new();
        executor.push(ExecutorOutcome::failure("nope")).await;

        assert_eq!(executor.execute("a.com", "q1").await, ExecutorOutcome::failure("nope"));
        assert_eq!(
            executor.execute("b.com", "q2").await,
            ExecutorOutcome::success("b.com: q2")
        );
        assert_eq!(executor.calls().await.len(), 2);
    }
}
