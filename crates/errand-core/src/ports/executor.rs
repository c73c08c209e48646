//! Executor port - 自動化エージェントの抽象化
//!
//! 実際のブラウザ操作はホスト側の責務です。core は 1 回に 1 つの呼び出し
//! しか行いません（並列実行なし）。

use async_trait::async_trait;

use crate::domain::ExecutorOutcome;

/// Executor performs the automation for one task.
///
/// Failures are reported through `ExecutorOutcome::Failure`, never by panicking.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, target: &str, query: &str) -> ExecutorOutcome;
}
