//! Time-bounded response cache.
//!
//! Uses DashMap for concurrent access without a global lock. The read-time
//! age check is authoritative: an entry past its TTL is never returned, even
//! if the periodic sweep has not removed it yet.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use super::key::RequestKey;
use crate::clock::{elapsed_between, Clock};

/// A cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Live while strictly younger than its TTL.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.stored_at, now) < self.ttl
    }
}

pub struct ResponseCache {
    entries: DashMap<RequestKey, CacheEntry>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::with_capacity(max_entries.min(4096)),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Live value for `key`. A stale entry is removed on the way out.
    pub fn get(&self, key: &RequestKey) -> Option<Value> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        None
    }

    pub fn insert(&self, key: RequestKey, value: Value, ttl: Duration) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_oldest();
        }
        let stored_at = self.clock.now();
        self.entries.insert(key, CacheEntry { value, stored_at, ttl });
    }

    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry for `endpoint`. Returns the number removed.
    pub fn invalidate_endpoint(&self, endpoint: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.endpoint() != endpoint);
        before.saturating_sub(self.entries.len())
    }

    /// Remove expired entries. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Entries currently stored, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.stored_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn cache(max: usize) -> (ResponseCache, ManualClock) {
        let clock = ManualClock::fixed();
        (ResponseCache::new(max, Arc::new(clock.clone())), clock)
    }

    fn key(id: u32) -> RequestKey {
        RequestKey::new("GET /notes", &json!({ "id": id }))
    }

    #[test]
    fn entry_invisible_at_exact_ttl() {
        let (cache, clock) = cache(10);
        cache.insert(key(1), json!("v"), Duration::from_secs(10));

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get(&key(1)), Some(json!("v")));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&key(1)), None);
        // Lazy removal on the stale read.
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (cache, clock) = cache(10);
        cache.insert(key(1), json!(1), Duration::from_secs(1));
        cache.insert(key(2), json!(2), Duration::from_secs(60));
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(2)), Some(json!(2)));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let (cache, clock) = cache(2);
        cache.insert(key(1), json!(1), Duration::from_secs(60));
        clock.advance(Duration::from_millis(10));
        cache.insert(key(2), json!(2), Duration::from_secs(60));
        clock.advance(Duration::from_millis(10));
        cache.insert(key(3), json!(3), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn invalidate_endpoint_leaves_others() {
        let (cache, _clock) = cache(10);
        cache.insert(key(1), json!(1), Duration::from_secs(60));
        cache.insert(RequestKey::new("GET /chats", &json!({})), json!(2), Duration::from_secs(60));

        assert_eq!(cache.invalidate_endpoint("GET /notes"), 1);
        assert_eq!(cache.len(), 1);
    }
}
