//! Bounded access history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied context for an access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Directory, folder or collection the resource was opened from.
    pub directory: Option<String>,
}

impl AccessContext {
    pub fn in_directory(directory: impl Into<String>) -> Self {
        Self { directory: Some(directory.into()) }
    }
}

/// One recorded access. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    /// Local hour of day, 0-23.
    pub hour: u8,
    /// Local weekday, 0 = Monday.
    pub day_of_week: u8,
    pub context_directory: Option<String>,
}

/// Ring buffer of the most recent accesses, oldest first.
#[derive(Debug, Clone)]
pub struct AccessHistory {
    events: VecDeque<AccessEvent>,
    capacity: usize,
}

impl AccessHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity.min(4096)), capacity }
    }

    /// Append, evicting and returning the oldest event when full.
    pub fn push(&mut self, event: AccessEvent) -> Option<AccessEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    pub fn last(&self) -> Option<&AccessEvent> {
        self.events.back()
    }

    /// Up to `n` most recent events, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &AccessEvent> {
        self.events.iter().rev().take(n)
    }

    /// All events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AccessEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<AccessEvent> {
        self.events.iter().cloned().collect()
    }

    /// Replace the contents, keeping only the newest `capacity` events.
    pub fn replace(&mut self, events: Vec<AccessEvent>) {
        let skip = events.len().saturating_sub(self.capacity);
        self.events = events.into_iter().skip(skip).collect();
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> AccessEvent {
        AccessEvent {
            resource_id: id.to_string(),
            timestamp: Utc::now(),
            hour: 9,
            day_of_week: 0,
            context_directory: None,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut history = AccessHistory::new(2);
        assert!(history.push(event("a")).is_none());
        assert!(history.push(event("b")).is_none());
        let evicted = history.push(event("c"));
        assert_eq!(evicted.map(|e| e.resource_id), Some("a".to_string()));
        let ids: Vec<_> = history.iter().map(|e| e.resource_id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[test]
    fn recent_is_newest_first() {
        let mut history = AccessHistory::new(10);
        for id in ["a", "b", "c"] {
            history.push(event(id));
        }
        let ids: Vec<_> = history.recent(2).map(|e| e.resource_id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[test]
    fn replace_keeps_newest() {
        let mut history = AccessHistory::new(2);
        history.replace(vec![event("a"), event("b"), event("c")]);
        assert_eq!(history.last().map(|e| e.resource_id.as_str()), Some("c"));
        assert_eq!(history.len(), 2);
    }
}
