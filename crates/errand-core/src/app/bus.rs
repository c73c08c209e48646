//! EventBus - ドメインイベントの配信
//!
//! 常に broadcast（`Errand::subscribe` 用）に流し、その後に登録された
//! EventSink（HistoryLog など）へ順に emit します。

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::DomainEvent;
use crate::impls::BroadcastEventSink;
use crate::ports::EventSink;

#[derive(Clone, Default)]
pub struct EventBus {
    broadcast: BroadcastEventSink,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            broadcast: BroadcastEventSink::default(),
            sinks,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.broadcast.subscribe()
    }

    pub async fn publish(&self, event: DomainEvent) {
        for sink in &self.sinks {
            sink.emit(&event).await;
        }
        self.broadcast.publish(event);
    }
}
