//! Resource event bus.
//!
//! Every successful store write publishes an event here; controller runners
//! subscribe and translate events into reconcile-queue keys. The bus is
//! broadcast-based with a monotone sequence number so late subscribers can
//! detect that they missed events and trigger a full resync.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Resource kinds that flow through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Experiment,
    Suggestion,
    Trial,
    /// A trial's workload; published by job providers.
    Workload,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experiment => "Experiment",
            Self::Suggestion => "Suggestion",
            Self::Trial => "Trial",
            Self::Workload => "Workload",
        }
    }
}

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

/// One observed change of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub sequence: u64,
    pub kind: ResourceKind,
    pub action: EventAction,
    pub namespace: String,
    pub name: String,
    /// Owning experiment name for suggestions/trials, owning trial name for
    /// workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast hub for resource events.
pub struct EventBus {
    sender: broadcast::Sender<ResourceEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender,
            sequence: AtomicU64::new(0),
        })
    }

    /// Publish an event. Returns the assigned sequence number. Events with
    /// no live subscriber are dropped silently.
    pub fn publish(
        &self,
        kind: ResourceKind,
        action: EventAction,
        namespace: &str,
        name: &str,
        owner: Option<&str>,
    ) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = ResourceEvent {
            sequence,
            kind,
            action,
            namespace: namespace.to_string(),
            name: name.to_string(),
            owner: owner.map(|o| o.to_string()),
            timestamp: Utc::now(),
        };
        let _ = self.sender.send(event);
        sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Sequence number of the most recently published event.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(
            ResourceKind::Experiment,
            EventAction::Created,
            "default",
            "tune",
            None,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ResourceKind::Experiment);
        assert_eq!(event.action, EventAction::Created);
        assert_eq!(event.name, "tune");
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn test_sequence_is_monotone() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for i in 0..5u64 {
            bus.publish(
                ResourceKind::Trial,
                EventAction::Updated,
                "default",
                &format!("trial-{i}"),
                Some("tune"),
            );
        }

        let mut last = 0;
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            assert!(event.sequence > last);
            last = event.sequence;
        }
        assert_eq!(bus.last_sequence(), 5);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(
            ResourceKind::Suggestion,
            EventAction::Deleted,
            "default",
            "tune",
            Some("tune"),
        );
        assert_eq!(bus.last_sequence(), 1);
    }
}
