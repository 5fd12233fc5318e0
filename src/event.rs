//! Event Bus (component C9).
//!
//! A bounded in-process publish/subscribe channel. Publishers (scheduler,
//! sub-agents, reviewer) enqueue events; subscribers (the out-of-scope
//! dashboard) drain them. Events are not persisted; a subscriber that falls
//! behind the backlog cap misses the oldest pending events and receives a
//! `subscriber_lagged` warning on its next read. Events published by a
//! single publisher arrive at each subscriber in publication order; no
//! cross-publisher ordering is guaranteed.
//!
//! Grounded on the `AgentEvent`/`OrchestrationEvent` enum catalog and
//! `EventHandler` async-trait callback interface in `event.rs`, with the
//! transport itself mapped onto `tokio::sync::broadcast` rather than a
//! hand-rolled fanout list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default backlog cap per spec.md §4.7 / §6.
pub const DEFAULT_BACKLOG: usize = 1000;

/// One of the 14 event kinds enumerated in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskLog,
    AgentCreated,
    AgentUpdated,
    AgentRemoved,
    AgentLog,
    AgentStream,
    AgentStreamClear,
    StepStatusChanged,
    ExecutionFlowUpdated,
    TaskProgress,
    OutputProgress,
}

/// A tagged record published on the Event Bus.
///
/// Wire shape to the out-of-scope WebSocket bridge is `{type, data,
/// timestamp}`; `type` here serialises from [`EventType`] and `data` from
/// `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_id: Uuid,
    #[serde(rename = "data")]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, task_id: Uuid, payload: Value) -> Self {
        Self {
            event_type,
            task_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Ergonomic subscriber surface layered over the broadcast channel.
///
/// Mirrors the teacher's `EventHandler` trait: a no-op default lets
/// observers implement only the callback they care about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &Event) {
        let _ = event;
    }

    /// Invoked when this subscriber missed `skipped` events because it fell
    /// behind the backlog cap.
    async fn on_lagged(&self, skipped: u64) {
        let _ = skipped;
    }
}

/// The bounded publish/subscribe channel itself.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(backlog: usize) -> Self {
        let (sender, _) = broadcast::channel(backlog.max(1));
        Self { sender }
    }

    pub fn with_default_backlog() -> Self {
        Self::new(DEFAULT_BACKLOG)
    }

    /// Publish an event. Publishing never blocks: a full backlog causes the
    /// slowest subscriber to lag rather than the publisher to wait.
    pub fn publish(&self, event: Event) {
        // No active subscribers is not an error: the bus is also useful
        // with zero observers attached (e.g. headless execution).
        let _ = self.sender.send(event);
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Register a handler; spawns a task that drains the channel and
    /// invokes the handler until the bus (and all its senders) are dropped.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> tokio::task::JoinHandle<()> {
        let mut rx = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler.on_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("event subscriber lagged, skipped {} events", skipped);
                        handler.on_lagged(skipped).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_backlog()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn on_event(&self, _event: &Event) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        let handle = bus.subscribe(Arc::new(CountingHandler {
            count: count.clone(),
        }));

        let task_id = Uuid::new_v4();
        for _ in 0..5 {
            bus.publish(Event::new(EventType::TaskLog, task_id, Value::Null));
        }

        // give the subscriber task a chance to drain
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
        handle.abort();
    }

    #[test]
    fn backlog_of_zero_is_clamped_to_one() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe_raw();
        bus.publish(Event::new(EventType::TaskCreated, Uuid::new_v4(), Value::Null));
        assert!(rx.try_recv().is_ok());
    }
}
