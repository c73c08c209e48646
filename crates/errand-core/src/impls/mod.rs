//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBackend**: テスト用・`--ephemeral` 用の PersistenceBackend（失敗注入つき）
//! - **JsonFileBackend**: JSON ファイルの PersistenceBackend
//! - **BroadcastEventSink**: UI 購読用の EventSink
//! - **HistoryLog**: JSON 履歴ログの EventSink
//! - **CommandExecutor**: 外部エージェントを子プロセスで呼ぶ Executor
//! - **ScriptedExecutor**: 決定的な Executor（テスト用・`--dry-run` 用）

pub mod broadcast_sink;
pub mod command_executor;
pub mod file_backend;
pub mod history_log;
pub mod inmem_backend;
pub mod scripted_executor;

pub use self::broadcast_sink::BroadcastEventSink;
pub use self::command_executor::CommandExecutor;
pub use self::file_backend::JsonFileBackend;
pub use self::history_log::{HistoryEntry, HistoryLog};
pub use self::inmem_backend::{InMemoryBackend, Verb};
pub use self::scripted_executor::ScriptedExecutor;
