//! ResultAggregator - 実行結果の記録
//!
//! 結果は task id で引きます（オブジェクトの同一性ではない）。
//! タスクを削除しても結果は残ります。消すのは `purge` だけです。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{RunId, TaskId, TaskResult, UntrustedText};
use crate::ports::Clock;

#[derive(Default)]
struct Ledger {
    results: Vec<TaskResult>,
    next_sequence: u64,
}

pub struct ResultAggregator {
    ledger: Mutex<Ledger>,
    clock: Arc<dyn Clock>,
}

impl ResultAggregator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            clock,
        }
    }

    /// Append a result with the next sequence index. Unbounded.
    pub async fn record(
        &self,
        task_id: TaskId,
        run_id: RunId,
        succeeded: bool,
        payload: impl Into<String>,
    ) -> TaskResult {
        let mut ledger = self.ledger.lock().await;
        let result = TaskResult {
            task_id,
            run_id,
            sequence_index: ledger.next_sequence,
            succeeded,
            payload: UntrustedText::new(payload),
            recorded_at: self.clock.now(),
        };
        ledger.next_sequence += 1;
        ledger.results.push(result.clone());
        result
    }

    /// Oldest first.
    pub async fn results_for(&self, task_id: TaskId) -> Vec<TaskResult> {
        self.ledger
            .lock()
            .await
            .results
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn latest_for(&self, task_id: TaskId) -> Option<TaskResult> {
        self.ledger
            .lock()
            .await
            .results
            .iter()
            .rev()
            .find(|r| r.task_id == task_id)
            .cloned()
    }

    pub async fn all(&self) -> Vec<TaskResult> {
        self.ledger.lock().await.results.clone()
    }

    pub async fn len(&self) -> usize {
        self.ledger.lock().await.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.lock().await.results.is_empty()
    }

    /// Drop every result of `task_id`. Sequence numbers are never reused.
    pub async fn purge(&self, task_id: TaskId) -> usize {
        let mut ledger = self.ledger.lock().await;
        let before = ledger.results.len();
        ledger.results.retain(|r| r.task_id != task_id);
        before - ledger.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn aggregator() -> ResultAggregator {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        ResultAggregator::new(Arc::new(FixedClock::new(at)))
    }

    #[tokio::test]
    async fn results_are_grouped_by_task_in_record_order() {
        let results = aggregator();
        let run = RunId::from_ulid(Ulid::new());
        let a = TaskId::from_ulid(Ulid::new());
        let b = TaskId::from_ulid(Ulid::new());

        results.record(a, run, true, "first").await;
        results.record(b, run, false, "boom").await;
        results.record(a, run, true, "second").await;

        let for_a = results.results_for(a).await;
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].payload.as_raw(), "first");
        assert_eq!(for_a[1].payload.as_raw(), "second");
        assert!(for_a[0].sequence_index < for_a[1].sequence_index);

        assert_eq!(results.latest_for(b).await.unwrap().payload.as_raw(), "boom");
        assert_eq!(results.len().await, 3);
    }

    #[tokio::test]
    async fn purge_only_touches_one_task_and_keeps_sequence_monotonic() {
        let results = aggregator();
        let run = RunId::from_ulid(Ulid::new());
        let a = TaskId::from_ulid(Ulid::new());
        let b = TaskId::from_ulid(Ulid::new());

        results.record(a, run, true, "a1").await;
        let b1 = results.record(b, run, true, "b1").await;

        assert_eq!(results.purge(a).await, 1);
        assert!(results.results_for(a).await.is_empty());
        assert_eq!(results.all().await, vec![b1.clone()]);

        let a2 = results.record(a, run, true, "a2").await;
        assert!(a2.sequence_index > b1.sequence_index);
    }
}
