//! errand-core
//!
//! Ordered automation task queue: tasks are edited against a persistence
//! backend with push-then-confirm semantics and run one at a time through
//! a host-supplied executor.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, result, outcome, events, errors）
//! - **ports**: 抽象化レイヤー（Executor, PersistenceBackend, EventSink, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（TaskStore, ExecutionScheduler, AppBuilder / Errand など）
//! - **impls**: 実装（InMemoryBackend, JsonFileBackend, HistoryLog, CommandExecutor など）
//! - **config**: 設定の読み込み（toml, 環境変数）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{AppBuilder, Errand, RunCancellationToken};
pub use config::ErrandConfig;
pub use domain::{ErrandError, NewTask, Task, TaskId, TaskPatch, TaskStatus};
