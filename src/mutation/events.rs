//! Mutation lifecycle events.
//!
//! Listeners are isolated from each other: a panicking listener is logged and
//! skipped, and every other listener still receives the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// An event emitted by the mutation manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationEvent {
    Success { id: String, entity: String },
    Failure { id: String, entity: String, error: String },
    Rollback { id: String, entity: String },
    Conflict { id: String, entity: String, conflicting_id: String },
    Queued { id: String, entity: String },
    Undo { id: String, entity: String },
    Redo { id: String, entity: String },
    Replayed { id: String, entity: String },
}

impl MutationEvent {
    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. }
            | Self::Failure { id, .. }
            | Self::Rollback { id, .. }
            | Self::Conflict { id, .. }
            | Self::Queued { id, .. }
            | Self::Undo { id, .. }
            | Self::Redo { id, .. }
            | Self::Replayed { id, .. } => id,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Self::Success { entity, .. }
            | Self::Failure { entity, .. }
            | Self::Rollback { entity, .. }
            | Self::Conflict { entity, .. }
            | Self::Queued { entity, .. }
            | Self::Undo { entity, .. }
            | Self::Redo { entity, .. }
            | Self::Replayed { entity, .. } => entity,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Rollback { .. } => "rollback",
            Self::Conflict { .. } => "conflict",
            Self::Queued { .. } => "queued",
            Self::Undo { .. } => "undo",
            Self::Redo { .. } => "redo",
            Self::Replayed { .. } => "replayed",
        }
    }
}

pub type Listener = Arc<dyn Fn(&MutationEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer registry with explicit subscribe/unsubscribe.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Deliver events over a channel instead of a callback. The subscription
    /// lapses once the receiver is dropped and the next event is emitted.
    pub fn subscribe_channel(self: &Arc<Self>) -> mpsc::UnboundedReceiver<MutationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::downgrade(self);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let own = Arc::clone(&slot);
        let id = self.subscribe(Arc::new(move |event: &MutationEvent| {
            if tx.send(event.clone()).is_err() {
                if let (Some(bus), Some(id)) = (bus.upgrade(), *own.lock()) {
                    bus.unsubscribe(id);
                }
            }
        }));
        *slot.lock() = Some(id);
        rx
    }

    /// Emit to every listener. Listeners run outside the registry lock.
    pub fn emit(&self, event: &MutationEvent) {
        let listeners: Vec<(SubscriptionId, Listener)> = self.listeners.lock().clone();
        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(subscription = id.0, event = event.kind(), "mutation listener panicked");
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn success(id: &str) -> MutationEvent {
        MutationEvent::Success { id: id.into(), entity: "note:1".into() }
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(|_: &MutationEvent| panic!("listener bug")));
        let counter = Arc::clone(&seen);
        bus.subscribe(Arc::new(move |_: &MutationEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(&success("m1"));
        bus.emit(&success("m2"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = bus.subscribe(Arc::new(move |_: &MutationEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        bus.emit(&success("m1"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&success("m2"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_subscription_lapses_when_dropped() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe_channel();
        bus.emit(&success("m1"));
        assert_eq!(rx.recv().await.map(|e| e.id().to_string()), Some("m1".to_string()));

        drop(rx);
        bus.emit(&success("m2"));
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(MutationEvent::Conflict {
            id: "m2".into(),
            entity: "note:1".into(),
            conflicting_id: "m1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "conflict");
        assert_eq!(json["conflicting_id"], "m1");
    }
}
