//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - BroadcastEventSink: UI 向けの購読（tokio broadcast）
//! - HistoryLog: JSON ファイルへの履歴記録
//! - NoopEventSink: 何もしない

use async_trait::async_trait;

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// Sinks must not fail the operation that emitted the event; they log and move on.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &DomainEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: &DomainEvent) {}
}
