//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait はホスト側の capability（executor, persistence backend）や
//! 横断的な関心事（時刻、ID、イベント）へのインターフェースです。
//! テストでは impls のモック実装に差し替えます。

pub mod clock;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod persistence;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::executor::Executor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::persistence::PersistenceBackend;
