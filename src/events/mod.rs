//! Events — in-process pub/sub for task/run lifecycle (§4.9, §6.4).
//!
//! Grounded on the teacher's `event/` module: a concurrent map from scope to
//! subscriber list, bounded per-subscriber channels, drop-on-overflow
//! delivery (§9 design notes: "subscribers receive via bounded channels
//! with drop-on-overflow permitted").

pub mod trace;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::util::ulid_gen::next_ulid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    TaskStarted,
    TaskCompleted,
    TaskOutput,
    CacheHit,
    CacheMiss,
}

/// `{id, timestamp, node, run_id, type, data}` (§4.9, §6.4). The source has
/// two event shapes (a struct and bare tuples); this standardizes on the
/// struct (§9 design notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub timestamp: DateTime<Utc>,
    pub node: String,
    pub run_id: Ulid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: JsonValue,
}

impl Event {
    pub fn new(node: impl Into<String>, run_id: Ulid, event_type: EventType, data: JsonValue) -> Self {
        Self {
            id: next_ulid(),
            timestamp: Utc::now(),
            node: node.into(),
            run_id,
            event_type,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Run(Ulid),
    All,
}

const MAILBOX_CAPACITY: usize = 1024;

struct Subscriber {
    scope: Scope,
    sender: mpsc::Sender<Event>,
}

/// Multi-producer, multi-subscriber event bus (§5 "Events bus"). Publish
/// never blocks: a full mailbox means that subscriber misses the event
/// rather than stalling the publisher.
#[derive(Default)]
pub struct EventBus {
    subscribers: DashMap<u64, Subscriber>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, scope: Scope) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { scope, sender: tx });
        rx
    }

    /// Best-effort fan-out to every subscriber whose scope matches
    /// `event.run_id` or `Scope::All` (§4.9).
    pub fn publish(&self, event: Event) {
        self.subscribers.retain(|_, sub| {
            let matches = match sub.scope {
                Scope::All => true,
                Scope::Run(run_id) => run_id == event.run_id,
            };
            if matches {
                // try_send: drop-on-overflow, never block the publisher.
                let _ = sub.sender.try_send(event.clone());
            }
            !sub.sender.is_closed()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_scoped_subscriber_ignores_other_runs() {
        let bus = EventBus::new();
        let run_a = next_ulid();
        let run_b = next_ulid();
        let mut rx = bus.subscribe(Scope::Run(run_a));

        bus.publish(Event::new("node1", run_b, EventType::RunStarted, serde_json::json!({})));
        bus.publish(Event::new("node1", run_a, EventType::RunStarted, serde_json::json!({})));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.run_id, run_a);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn all_scope_receives_every_run() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Scope::All);
        bus.publish(Event::new("node1", next_ulid(), EventType::TaskStarted, serde_json::json!({"task": "build"})));
        bus.publish(Event::new("node1", next_ulid(), EventType::TaskCompleted, serde_json::json!({"task": "build"})));
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }
}
