//! FIFO queue of mutations waiting for connectivity.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::remote::RemoteEffect;

/// A mutation whose remote effect has not been delivered yet.
#[derive(Debug, Clone)]
pub struct QueuedMutation {
    pub id: String,
    pub entity: String,
    pub remote: RemoteEffect,
    pub queued_at: DateTime<Utc>,
    /// Failed replay attempts so far.
    pub attempts: u32,
}

/// Stored form of a queued request-style mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMutation {
    pub id: String,
    pub entity: String,
    pub endpoint: String,
    pub params: Value,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedMutation {
    /// `None` for custom effects, which cannot outlive the process.
    pub fn to_persisted(&self) -> Option<PersistedMutation> {
        match &self.remote {
            RemoteEffect::Request { endpoint, params } => Some(PersistedMutation {
                id: self.id.clone(),
                entity: self.entity.clone(),
                endpoint: endpoint.clone(),
                params: params.clone(),
                queued_at: self.queued_at,
                attempts: self.attempts,
            }),
            RemoteEffect::Custom(_) => None,
        }
    }

    pub fn from_persisted(p: PersistedMutation) -> Self {
        Self {
            id: p.id,
            entity: p.entity,
            remote: RemoteEffect::Request { endpoint: p.endpoint, params: p.params },
            queued_at: p.queued_at,
            attempts: p.attempts,
        }
    }
}

/// Submission-ordered queue. Failed replays go back to the tail.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedMutation>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, entry: QueuedMutation) {
        self.entries.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<QueuedMutation> {
        self.entries.pop_front()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn persisted(&self) -> Vec<PersistedMutation> {
        self.entries.iter().filter_map(QueuedMutation::to_persisted).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queued(id: &str, remote: RemoteEffect) -> QueuedMutation {
        QueuedMutation {
            id: id.into(),
            entity: "note:1".into(),
            remote,
            queued_at: Utc::now(),
            attempts: 0,
        }
    }

    #[test]
    fn fifo_with_requeue_at_tail() {
        let mut queue = OfflineQueue::new();
        for id in ["a", "b", "c"] {
            queue.push_back(queued(id, RemoteEffect::request("PUT /notes", json!({}))));
        }
        let a = queue.pop_front().unwrap();
        assert_eq!(a.id, "a");
        queue.push_back(a);
        assert_eq!(queue.ids(), ["b", "c", "a"]);
    }

    #[test]
    fn only_request_effects_persist() {
        let mut queue = OfflineQueue::new();
        queue.push_back(queued("a", RemoteEffect::request("PUT /notes", json!({"id": 1}))));
        queue.push_back(queued("b", RemoteEffect::custom(|| async { Ok(json!(null)) })));

        let stored = queue.persisted();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "a");

        let restored = QueuedMutation::from_persisted(stored[0].clone());
        assert!(restored.remote.is_persistable());
        assert_eq!(restored.to_persisted().as_ref(), Some(&stored[0]));
    }
}
