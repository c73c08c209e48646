//! ExecutionScheduler - run の実行
//!
//! # 状態遷移
//! Idle → Running（snapshot を順番に処理）→ Idle
//!
//! # 設計原則
//! - 一度に 1 run だけ（`RunGuard`）、run 内では 1 タスクずつ順番に実行
//! - snapshot は開始時点の Pending タスク。後から追加されたタスクは対象外
//! - executor の失敗は run を止めない（結果として記録し、タスクは Failed）
//! - キャンセルは「現在のタスクの後で止まる」。実行中の呼び出しは中断しない

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::app::results::ResultAggregator;
use crate::app::store::TaskStore;
use crate::domain::{
    DomainEvent, ErrandError, ExecutorOutcome, RunId, RunSummary, Task, TaskId, TaskStatus,
};
use crate::ports::{Executor, IdGenerator};

/// Cooperative stop request for a run.
#[derive(Debug, Clone, Default)]
pub struct RunCancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl RunCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Pause between consecutive executor calls.
    pub inter_task_delay: Duration,
    pub executor_timeout: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            inter_task_delay: Duration::from_millis(crate::config::DEFAULT_INTER_TASK_DELAY_MS),
            executor_timeout: None,
        }
    }
}

type ActiveSlot = Arc<Mutex<Option<RunCancellationToken>>>;

/// Publishes the active run's token for `cancel()`. Dropping it clears the slot.
struct ActiveRun {
    slot: ActiveSlot,
}

impl ActiveRun {
    fn register(slot: &ActiveSlot, token: &RunCancellationToken) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Self { slot: slot.clone() }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

pub struct ExecutionScheduler {
    store: Arc<TaskStore>,
    results: Arc<ResultAggregator>,
    executor: Arc<dyn Executor>,
    ids: Arc<dyn IdGenerator>,
    settings: SchedulerSettings,
    active: ActiveSlot,
}

impl ExecutionScheduler {
    pub fn new(
        store: Arc<TaskStore>,
        results: Arc<ResultAggregator>,
        executor: Arc<dyn Executor>,
        ids: Arc<dyn IdGenerator>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            results,
            executor,
            ids,
            settings,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.store.is_running()
    }

    pub async fn run(&self) -> Result<RunSummary, ErrandError> {
        self.run_with_token(RunCancellationToken::new()).await
    }

    /// Ask the active run to stop after the current task. Returns false when idle.
    pub fn cancel(&self) -> bool {
        match self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn run_with_token(
        &self,
        token: RunCancellationToken,
    ) -> Result<RunSummary, ErrandError> {
        let _guard = self.store.begin_run()?;
        let _active = ActiveRun::register(&self.active, &token);

        let snapshot = self.store.pending_ids().await;
        if snapshot.is_empty() {
            return Err(ErrandError::EmptyQueue);
        }

        let run_id = self.ids.generate_run_id();

        info!(run_id = %run_id, task_count = snapshot.len(), "run started");
        self.store
            .publish(DomainEvent::RunStarted {
                run_id,
                task_count: snapshot.len(),
            })
            .await;

        let summary = self.drive(run_id, &snapshot, &token).await;
        info!(
            run_id = %run_id,
            attempted = summary.attempted,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "run finished"
        );
        self.store.publish(DomainEvent::RunFinished { summary }).await;
        Ok(summary)
    }

    async fn drive(
        &self,
        run_id: RunId,
        snapshot: &[TaskId],
        token: &RunCancellationToken,
    ) -> RunSummary {
        let mut summary = RunSummary::new(run_id);
        let mut invoked = false;

        for &task_id in snapshot {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if !self.is_pending(task_id).await {
                summary.skipped += 1;
                continue;
            }
            if invoked {
                self.pause().await;
                if token.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
            }
            let Some(task) = self.claim(task_id).await else {
                summary.skipped += 1;
                continue;
            };

            summary.attempted += 1;
            let succeeded = self.execute_task(run_id, &task).await;
            invoked = true;

            if succeeded {
                summary.completed += 1;
                self.settle(task_id, TaskStatus::Completed, run_id).await;
            } else {
                summary.failed += 1;
                self.settle(task_id, TaskStatus::Failed, run_id).await;
            }
        }

        // a stop requested during the last task still counts
        summary.cancelled |= token.is_cancelled();
        summary
    }

    async fn is_pending(&self, task_id: TaskId) -> bool {
        self.store
            .get(task_id)
            .await
            .is_some_and(|task| task.status == TaskStatus::Pending)
    }

    /// Mark a snapshotted task `Doing`, or `None` if it is gone or no longer `Pending`.
    async fn claim(&self, task_id: TaskId) -> Option<Task> {
        self.store.set_status(task_id, TaskStatus::Doing).await.ok()?;
        self.store.get(task_id).await
    }

    async fn settle(&self, task_id: TaskId, to: TaskStatus, run_id: RunId) {
        if let Err(err) = self.store.set_status(task_id, to).await {
            warn!(run_id = %run_id, task_id = %task_id, error = %err, "could not settle task status");
        }
    }

    /// Invoke the executor `loop_count` times. True when every invocation succeeded.
    ///
    /// Cancellation is not checked here: a started task always runs all its iterations.
    async fn execute_task(&self, run_id: RunId, task: &Task) -> bool {
        let mut all_succeeded = true;

        for iteration in 0..task.loop_count {
            if iteration > 0 {
                self.pause().await;
            }

            let outcome = self.invoke(task).await;
            let succeeded = outcome.is_success();
            if !succeeded {
                all_succeeded = false;
                if let ExecutorOutcome::Failure { error } = &outcome {
                    warn!(run_id = %run_id, task_id = %task.id, iteration, error = %error, "executor failed");
                }
            }

            let result = self
                .results
                .record(task.id, run_id, succeeded, outcome.into_payload())
                .await;
            self.store
                .publish(DomainEvent::ResultRecorded {
                    task_id: task.id,
                    run_id,
                    sequence_index: result.sequence_index,
                    succeeded,
                    payload: result.payload,
                })
                .await;
        }

        all_succeeded
    }

    async fn invoke(&self, task: &Task) -> ExecutorOutcome {
        let call = self.executor.execute(&task.target, &task.query);
        match self.settings.executor_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => ExecutorOutcome::failure(format!(
                    "executor timed out after {}ms",
                    limit.as_millis()
                )),
            },
            None => call.await,
        }
    }

    async fn pause(&self) {
        if !self.settings.inter_task_delay.is_zero() {
            tokio::time::sleep(self.settings.inter_task_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::bus::EventBus;
    use crate::app::sync::PersistenceSync;
    use crate::domain::{NewTask, SyncOutcome, TaskPatch};
    use crate::impls::{InMemoryBackend, ScriptedExecutor};
    use crate::ports::{PersistenceBackend, SystemClock, UlidGenerator};
    use async_trait::async_trait;
    use std::sync::Weak;
    use tokio::sync::{Notify, broadcast};
    use tokio::time::Instant;

    struct Harness {
        store: Arc<TaskStore>,
        results: Arc<ResultAggregator>,
        ids: Vec<TaskId>,
    }

    impl Harness {
        async fn new(tasks: &[(&str, &str)]) -> Self {
            let backend = Arc::new(InMemoryBackend::new());
            let store = Arc::new(TaskStore::new(
                PersistenceSync::new(backend, Duration::from_secs(1)),
                EventBus::default(),
            ));
            let mut ids = Vec::new();
            for (target, query) in tasks {
                ids.push(store.add(NewTask::new(*target, *query)).await.unwrap().id);
            }
            Self {
                store,
                results: Arc::new(ResultAggregator::new(Arc::new(SystemClock))),
                ids,
            }
        }

        fn scheduler(&self, executor: Arc<dyn Executor>, settings: SchedulerSettings) -> ExecutionScheduler {
            ExecutionScheduler::new(
                self.store.clone(),
                self.results.clone(),
                executor,
                Arc::new(UlidGenerator::new(SystemClock)),
                settings,
            )
        }

        async fn statuses(&self) -> Vec<TaskStatus> {
            self.store.list().await.iter().map(|t| t.status).collect()
        }
    }

    fn no_delay() -> SchedulerSettings {
        SchedulerSettings {
            inter_task_delay: Duration::ZERO,
            executor_timeout: None,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn two_tasks_run_in_order_and_complete() {
        let h = Harness::new(&[("a.com", "q1"), ("b.com", "q2")]).await;
        let executor = Arc::new(ScriptedExecutor::new());
        let scheduler = h.scheduler(executor.clone(), no_delay());
        let mut events = h.store.subscribe();

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.completed, 2);
        assert_eq!(h.statuses().await, vec![TaskStatus::Completed; 2]);
        assert_eq!(h.results.results_for(h.ids[0]).await.len(), 1);
        assert_eq!(h.results.results_for(h.ids[1]).await.len(), 1);
        assert_eq!(
            executor.calls().await,
            vec![
                ("a.com".to_string(), "q1".to_string()),
                ("b.com".to_string(), "q2".to_string())
            ]
        );

        let transitions: Vec<(TaskId, TaskStatus)> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                DomainEvent::StatusChanged { task_id, to, .. } => Some((task_id, to)),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                (h.ids[0], TaskStatus::Doing),
                (h.ids[0], TaskStatus::Completed),
                (h.ids[1], TaskStatus::Doing),
                (h.ids[1], TaskStatus::Completed),
            ]
        );
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn executor_failure_marks_failed_and_run_continues() {
        let h = Harness::new(&[("a.com", "q1"), ("b.com", "q2")]).await;
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push(ExecutorOutcome::failure("captcha wall")).await;
        let scheduler = h.scheduler(executor, no_delay());

        let summary = scheduler.run().await.unwrap();

        assert_eq!((summary.completed, summary.failed), (1, 1));
        assert_eq!(h.statuses().await, vec![TaskStatus::Failed, TaskStatus::Completed]);
        let failed = h.results.latest_for(h.ids[0]).await.unwrap();
        assert!(!failed.succeeded);
        assert_eq!(failed.payload.as_raw(), "captcha wall");
    }

    #[tokio::test]
    async fn empty_queue_is_rejected() {
        let h = Harness::new(&[]).await;
        let scheduler = h.scheduler(Arc::new(ScriptedExecutor::new()), no_delay());

        assert_eq!(scheduler.run().await, Err(ErrandError::EmptyQueue));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn finished_tasks_are_not_rerun() {
        let h = Harness::new(&[("a.com", "q1")]).await;
        let scheduler = h.scheduler(Arc::new(ScriptedExecutor::new()), no_delay());

        scheduler.run().await.unwrap();
        assert_eq!(scheduler.run().await, Err(ErrandError::EmptyQueue));

        h.store.reset_all().await.unwrap();
        assert!(scheduler.run().await.is_ok());
        assert_eq!(h.results.results_for(h.ids[0]).await.len(), 2);
    }

    #[tokio::test]
    async fn loop_count_invokes_executor_repeatedly() {
        let h = Harness::new(&[]).await;
        let task = h
            .store
            .add(NewTask::new("a.com", "q").with_loop_count(3))
            .await
            .unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        executor.push(ExecutorOutcome::success("ok")).await;
        executor.push(ExecutorOutcome::failure("flaky")).await;
        let scheduler = h.scheduler(executor.clone(), no_delay());

        let summary = scheduler.run().await.unwrap();

        assert_eq!(executor.calls().await.len(), 3);
        assert_eq!(h.results.results_for(task.id).await.len(), 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.get(task.id).await.unwrap().status, TaskStatus::Failed);
    }

    /// Executor that records how many tasks are `Doing` while it runs.
    struct Observer {
        store: Weak<TaskStore>,
        max_doing: Mutex<usize>,
    }

    #[async_trait]
    impl Executor for Observer {
        async fn execute(&self, _target: &str, _query: &str) -> ExecutorOutcome {
            if let Some(store) = self.store.upgrade() {
                let doing = store
                    .list()
                    .await
                    .iter()
                    .filter(|t| t.status == TaskStatus::Doing)
                    .count();
                let mut max = self.max_doing.lock().unwrap();
                *max = (*max).max(doing);
            }
            ExecutorOutcome::success("seen")
        }
    }

    #[tokio::test]
    async fn exactly_one_task_is_doing_during_execution() {
        let h = Harness::new(&[("a.com", "1"), ("b.com", "2"), ("c.com", "3")]).await;
        let observer = Arc::new(Observer {
            store: Arc::downgrade(&h.store),
            max_doing: Mutex::new(0),
        });
        let scheduler = h.scheduler(observer.clone(), no_delay());

        scheduler.run().await.unwrap();

        assert_eq!(*observer.max_doing.lock().unwrap(), 1);
    }

    /// Executor that blocks until released.
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Executor for Gate {
        async fn execute(&self, _target: &str, _query: &str) -> ExecutorOutcome {
            self.entered.notify_one();
            self.release.notified().await;
            ExecutorOutcome::success("released")
        }
    }

    fn gate() -> Arc<Gate> {
        Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    #[tokio::test]
    async fn second_run_and_structural_edits_are_rejected_mid_run() {
        let h = Harness::new(&[("a.com", "q1")]).await;
        let gate = gate();
        let scheduler = Arc::new(h.scheduler(gate.clone(), no_delay()));

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        gate.entered.notified().await;

        assert_eq!(scheduler.run().await, Err(ErrandError::AlreadyRunning));
        assert_eq!(
            h.store.add(NewTask::new("late.com", "q")).await,
            Err(ErrandError::Busy)
        );
        assert_eq!(
            h.store
                .update(h.ids[0], &TaskPatch::default().query("edit"))
                .await,
            Err(ErrandError::Busy)
        );

        gate.release.notify_one();
        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.attempted, 1);

        let late = h.store.add(NewTask::new("late.com", "q")).await.unwrap();
        assert_eq!(h.store.get(late.id).await.unwrap().status, TaskStatus::Pending);
        assert_eq!(h.statuses().await, vec![TaskStatus::Completed, TaskStatus::Pending]);
    }

    /// Backend whose `create_task` waits for a release.
    struct SlowCreate {
        inner: InMemoryBackend,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PersistenceBackend for SlowCreate {
        async fn list_tasks(&self) -> SyncOutcome<Vec<Task>> {
            self.inner.list_tasks().await
        }

        async fn create_task(&self, new: &NewTask) -> SyncOutcome<Task> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.create_task(new).await
        }

        async fn update_task(&self, task: &Task) -> SyncOutcome<()> {
            self.inner.update_task(task).await
        }

        async fn delete_task(&self, id: TaskId) -> SyncOutcome<()> {
            self.inner.delete_task(id).await
        }
    }

    #[tokio::test]
    async fn task_confirmed_after_snapshot_is_left_pending() {
        let backend = Arc::new(SlowCreate {
            inner: InMemoryBackend::new(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let store = Arc::new(TaskStore::new(
            PersistenceSync::new(backend.clone(), Duration::from_secs(5)),
            EventBus::default(),
        ));
        let first = backend.inner.seed(NewTask::new("a.com", "q1")).await;
        store.load(vec![first.clone()]).await.unwrap();
        let results = Arc::new(ResultAggregator::new(Arc::new(SystemClock)));
        let scheduler = ExecutionScheduler::new(
            store.clone(),
            results.clone(),
            Arc::new(ScriptedExecutor::new()),
            Arc::new(UlidGenerator::new(SystemClock)),
            no_delay(),
        );

        let adding = tokio::spawn({
            let store = store.clone();
            async move { store.add(NewTask::new("late.com", "q2")).await }
        });
        backend.entered.notified().await;

        let summary = scheduler.run().await.unwrap();
        backend.release.notify_one();
        let late = adding.await.unwrap().unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(store.get(first.id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(store.get(late.id).await.unwrap().status, TaskStatus::Pending);
        assert!(results.results_for(late.id).await.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_after_current_task() {
        let h = Harness::new(&[("a.com", "1"), ("b.com", "2"), ("c.com", "3")]).await;
        let gate = gate();
        let scheduler = Arc::new(h.scheduler(gate.clone(), no_delay()));

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        gate.entered.notified().await;

        assert!(scheduler.cancel());
        gate.release.notify_one();

        let summary = running.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 1);
        assert_eq!(
            h.statuses().await,
            vec![TaskStatus::Completed, TaskStatus::Pending, TaskStatus::Pending]
        );
        assert!(!scheduler.cancel());
    }

    #[tokio::test]
    async fn cancel_mid_task_finishes_every_iteration() {
        let h = Harness::new(&[]).await;
        let task = h
            .store
            .add(NewTask::new("a.com", "q").with_loop_count(3))
            .await
            .unwrap();
        let gate = gate();
        let scheduler = Arc::new(h.scheduler(gate.clone(), no_delay()));

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        for iteration in 0..3 {
            gate.entered.notified().await;
            if iteration == 0 {
                assert!(scheduler.cancel());
            }
            gate.release.notify_one();
        }

        let summary = running.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert_eq!((summary.attempted, summary.completed), (1, 1));
        assert_eq!(h.results.results_for(task.id).await.len(), 3);
        assert_eq!(h.store.get(task.id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn dropped_run_releases_flag_and_token() {
        let h = Harness::new(&[("a.com", "1")]).await;
        let gate = gate();
        let scheduler = Arc::new(h.scheduler(gate.clone(), no_delay()));

        let running = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });
        gate.entered.notified().await;
        assert!(scheduler.is_running());

        running.abort();
        assert!(running.await.unwrap_err().is_cancelled());

        assert!(!scheduler.is_running());
        assert!(!scheduler.cancel());
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_nothing() {
        let h = Harness::new(&[("a.com", "1")]).await;
        let executor = Arc::new(ScriptedExecutor::new());
        let scheduler = h.scheduler(executor.clone(), no_delay());
        let token = RunCancellationToken::new();
        token.cancel();

        let summary = scheduler.run_with_token(token).await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 0);
        assert!(executor.calls().await.is_empty());
        assert_eq!(h.statuses().await, vec![TaskStatus::Pending]);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_applies_only_between_tasks() {
        let h = Harness::new(&[("a.com", "1"), ("b.com", "2"), ("c.com", "3")]).await;
        let settings = SchedulerSettings {
            inter_task_delay: Duration::from_secs(2),
            executor_timeout: None,
        };
        let scheduler = h.scheduler(Arc::new(ScriptedExecutor::new()), settings);

        let start = Instant::now();
        scheduler.run().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_secs(6));
    }

    struct Stalled;

    #[async_trait]
    impl Executor for Stalled {
        async fn execute(&self, _target: &str, _query: &str) -> ExecutorOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn executor_timeout_counts_as_failure() {
        let h = Harness::new(&[("a.com", "1")]).await;
        let settings = SchedulerSettings {
            inter_task_delay: Duration::ZERO,
            executor_timeout: Some(Duration::from_millis(500)),
        };
        let scheduler = h.scheduler(Arc::new(Stalled), settings);

        let summary = scheduler.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        let result = h.results.latest_for(h.ids[0]).await.unwrap();
        assert_eq!(result.payload.as_raw(), "executor timed out after 500ms");
        assert_eq!(h.statuses().await, vec![TaskStatus::Failed]);
    }
}
