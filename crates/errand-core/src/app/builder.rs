//! AppBuilder - Errand の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンで host capability（backend, executor）と sink を差し込む
//! - 起動時検証（Fail-fast 設計）: 不正な設定は build() で弾く
//! - スコープ付きの非同期初期化: `Errand::init()` を一度 await してから使う

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::app::bus::EventBus;
use crate::app::reorder::compute_order;
use crate::app::results::ResultAggregator;
use crate::app::scheduler::{ExecutionScheduler, RunCancellationToken, SchedulerSettings};
use crate::app::store::TaskStore;
use crate::app::sync::PersistenceSync;
use crate::config::{ConfigError, ErrandConfig};
use crate::domain::{
    DomainEvent, ErrandError, NewTask, RunSummary, Task, TaskId, TaskPatch, TaskResult,
};
use crate::ports::{
    Clock, EventSink, Executor, IdGenerator, PersistenceBackend, SystemClock, UlidGenerator,
};

/// AppBuilder は Errand を構築
///
/// # 使用例
/// ```ignore
/// let errand = AppBuilder::new(backend, executor)
///     .config(config)
///     .event_sink(history)
///     .build()?;
/// errand.init().await?;
/// ```
pub struct AppBuilder {
    backend: Arc<dyn PersistenceBackend>,
    executor: Arc<dyn Executor>,
    config: ErrandConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AppBuilder {
    pub fn new(backend: Arc<dyn PersistenceBackend>, executor: Arc<dyn Executor>) -> Self {
        Self {
            backend,
            executor,
            config: ErrandConfig::default(),
            sinks: Vec::new(),
            clock: Arc::new(SystemClock),
            ids: None,
        }
    }

    pub fn config(mut self, config: ErrandConfig) -> Self {
        self.config = config;
        self
    }

    /// Extra sink receiving every domain event (in registration order).
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// # 検証
    /// - `ErrandConfig::validate()` が失敗すれば BuildError::Config
    pub fn build(self) -> Result<Errand, BuildError> {
        self.config.validate()?;

        let ids = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(SystemClock)),
        };
        let sync = PersistenceSync::new(self.backend, self.config.backend_timeout());
        let store = Arc::new(TaskStore::new(sync.clone(), EventBus::new(self.sinks)));
        let results = Arc::new(ResultAggregator::new(self.clock));
        let scheduler = ExecutionScheduler::new(
            store.clone(),
            results.clone(),
            self.executor,
            ids,
            SchedulerSettings {
                inter_task_delay: self.config.inter_task_delay(),
                executor_timeout: self.config.executor_timeout(),
            },
        );

        Ok(Errand {
            store,
            sync,
            scheduler,
            results,
            purge_results_on_delete: self.config.persistence.purge_results_on_delete,
            initialized: AtomicBool::new(false),
        })
    }
}

/// Errand はホストに公開する entry point の集合
///
/// `init()` が成功するまで `subscribe` 以外は `NotInitialized` を返します。
pub struct Errand {
    store: Arc<TaskStore>,
    sync: PersistenceSync,
    scheduler: ExecutionScheduler,
    results: Arc<ResultAggregator>,
    purge_results_on_delete: bool,
    initialized: AtomicBool,
}

impl Errand {
    /// Await the backend's ready handshake and load the persisted tasks as `Pending`.
    /// Refused with `Busy` while a run is in progress.
    pub async fn init(&self) -> Result<(), ErrandError> {
        if self.store.is_running() {
            return Err(ErrandError::Busy);
        }
        self.sync.ready().await?;
        let tasks = self.sync.list().await?;
        self.store.load(tasks).await?;
        self.initialized.store(true, Ordering::Release);
        info!(count = self.store.len().await, "errand initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, ErrandError> {
        self.ensure_initialized()?;
        Ok(self.store.list().await)
    }

    pub async fn task(&self, id: TaskId) -> Result<Task, ErrandError> {
        self.ensure_initialized()?;
        self.store.get(id).await.ok_or(ErrandError::NotFound(id))
    }

    pub async fn add(&self, new: NewTask) -> Result<Task, ErrandError> {
        self.ensure_initialized()?;
        self.store.add(new).await
    }

    pub async fn update(&self, id: TaskId, patch: &TaskPatch) -> Result<Task, ErrandError> {
        self.ensure_initialized()?;
        self.store.update(id, patch).await
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), ErrandError> {
        self.ensure_initialized()?;
        self.store.delete(id).await?;
        if self.purge_results_on_delete {
            let purged = self.results.purge(id).await;
            info!(task_id = %id, purged, "results purged with task");
        }
        Ok(())
    }

    /// Drag-and-drop: move `source` to `target`'s slot, then persist the order best-effort.
    pub async fn move_task(&self, source: TaskId, target: TaskId) -> Result<Vec<TaskId>, ErrandError> {
        self.ensure_initialized()?;
        let order = compute_order(&self.store.ids().await, source, target)?;
        self.reorder(&order).await?;
        Ok(order)
    }

    /// Apply a full order and persist it best-effort. A failed save keeps the local order.
    pub async fn reorder(&self, order: &[TaskId]) -> Result<(), ErrandError> {
        self.ensure_initialized()?;
        self.store.reorder(order).await?;
        if let Err(err) = self.sync.save_order(order).await {
            warn!(error = %err, "order not persisted");
        }
        Ok(())
    }

    pub async fn reset(&self, id: TaskId) -> Result<bool, ErrandError> {
        self.ensure_initialized()?;
        self.store.reset(id).await
    }

    pub async fn reset_all(&self) -> Result<Vec<TaskId>, ErrandError> {
        self.ensure_initialized()?;
        self.store.reset_all().await
    }

    pub async fn run(&self) -> Result<RunSummary, ErrandError> {
        self.ensure_initialized()?;
        self.scheduler.run().await
    }

    pub async fn run_with_token(&self, token: RunCancellationToken) -> Result<RunSummary, ErrandError> {
        self.ensure_initialized()?;
        self.scheduler.run_with_token(token).await
    }

    /// Ask the active run to stop after its current task. False when idle.
    pub fn cancel_run(&self) -> bool {
        self.scheduler.cancel()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub async fn results_for(&self, id: TaskId) -> Result<Vec<TaskResult>, ErrandError> {
        self.ensure_initialized()?;
        Ok(self.results.results_for(id).await)
    }

    pub async fn latest_result(&self, id: TaskId) -> Result<Option<TaskResult>, ErrandError> {
        self.ensure_initialized()?;
        Ok(self.results.latest_for(id).await)
    }

    pub async fn purge_results(&self, id: TaskId) -> Result<usize, ErrandError> {
        self.ensure_initialized()?;
        Ok(self.results.purge(id).await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.store.subscribe()
    }

    fn ensure_initialized(&self) -> Result<(), ErrandError> {
        if !self.is_initialized() {
            return Err(ErrandError::NotInitialized);
        }
        Ok(())
    }
}
