//! App - アプリケーションロジック
//!
//! - **store**: TaskStore（タスクの正本、run フラグ）
//! - **sync**: PersistenceSync（push-then-confirm）
//! - **reorder**: compute_order（並び替えの純粋関数）
//! - **scheduler**: ExecutionScheduler（run の実行、キャンセル）
//! - **results**: ResultAggregator（実行結果）
//! - **bus**: EventBus（broadcast + 追加 sink）
//! - **builder**: AppBuilder / Errand（ホスト向けファサード）

pub mod builder;
pub mod bus;
pub mod reorder;
pub mod results;
pub mod scheduler;
pub mod store;
pub mod sync;

pub use self::builder::{AppBuilder, BuildError, Errand};
pub use self::bus::EventBus;
pub use self::reorder::compute_order;
pub use self::results::ResultAggregator;
pub use self::scheduler::{ExecutionScheduler, RunCancellationToken, SchedulerSettings};
pub use self::store::{RunGuard, TaskStore};
pub use self::sync::PersistenceSync;
