//! BroadcastEventSink - UI 向けのイベント購読
//!
//! tokio broadcast でファンアウトします。購読者がいない時の send 失敗は
//! 無視します。遅い購読者は古いイベントを取りこぼします（Lagged）。

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::DomainEvent;
use crate::ports::EventSink;

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn emit(&self, event: &DomainEvent) {
        self.publish(event.clone());
    }
}
