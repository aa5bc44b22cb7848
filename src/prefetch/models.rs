//! Pattern models derived from the access history.
//!
//! The models always describe exactly the retained history: `observe` adds
//! an event's contributions and `forget` takes back those of an evicted one,
//! so incremental updates and a full `rebuild` agree.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use super::history::{AccessEvent, AccessHistory};

type Counts = HashMap<String, u32>;

/// Counts with a running total. Zero counts are not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: Counts,
    total: u32,
}

impl Histogram {
    fn add(&mut self, id: &str) {
        *self.counts.entry(id.to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    fn remove(&mut self, id: &str) {
        if let Some(count) = self.counts.get_mut(id) {
            *count -= 1;
            self.total -= 1;
            if *count == 0 {
                self.counts.remove(id);
            }
        }
    }

    pub fn count(&self, id: &str) -> u32 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Take one `id` out of `map[key]`, dropping the histogram once empty.
fn decrement<K, Q>(map: &mut HashMap<K, Histogram>, key: &Q, id: &str)
where
    K: Borrow<Q> + Hash + Eq,
    Q: Hash + Eq + ?Sized,
{
    if let Some(histogram) = map.get_mut(key) {
        histogram.remove(id);
        if histogram.is_empty() {
            map.remove(key);
        }
    }
}

/// Sequence, temporal, co-occurrence and directory statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternModels {
    window: usize,
    sequence: HashMap<String, Histogram>,
    by_hour: HashMap<u8, Histogram>,
    by_weekday: HashMap<u8, Histogram>,
    cooccurrence: HashMap<String, Histogram>,
    /// Accesses per resource within each directory.
    directories: HashMap<String, Histogram>,
}

impl PatternModels {
    /// `window` is how many preceding accesses count as co-occurring.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            sequence: HashMap::new(),
            by_hour: HashMap::new(),
            by_weekday: HashMap::new(),
            cooccurrence: HashMap::new(),
            directories: HashMap::new(),
        }
    }

    /// Fold `event` into the models. `history` must not contain it yet.
    ///
    /// Touches at most `window` prior events.
    pub fn observe(&mut self, history: &AccessHistory, event: &AccessEvent) {
        let id = event.resource_id.as_str();

        if let Some(prev) = history.last() {
            if prev.resource_id != id {
                self.sequence.entry(prev.resource_id.clone()).or_default().add(id);
            }
        }

        self.by_hour.entry(event.hour).or_default().add(id);
        self.by_weekday.entry(event.day_of_week).or_default().add(id);

        let mut seen = HashSet::new();
        for other in history.recent(self.window) {
            let other_id = other.resource_id.as_str();
            if other_id == id || !seen.insert(other_id) {
                continue;
            }
            self.cooccurrence.entry(id.to_string()).or_default().add(other_id);
            self.cooccurrence.entry(other_id.to_string()).or_default().add(id);
        }

        if let Some(dir) = &event.context_directory {
            self.directories.entry(dir.clone()).or_default().add(id);
        }
    }

    /// Remove what `evicted` contributed. `history` is what remains after
    /// the eviction, oldest first; `evicted` was older than all of it.
    ///
    /// Touches at most `window` retained events.
    pub fn forget(&mut self, history: &AccessHistory, evicted: &AccessEvent) {
        let gone = evicted.resource_id.as_str();

        // The transition out of the evicted event. Nothing led into it any
        // more; that edge went with the event before it.
        if let Some(next) = history.iter().next() {
            if next.resource_id != gone {
                decrement(&mut self.sequence, gone, &next.resource_id);
            }
        }

        decrement(&mut self.by_hour, &evicted.hour, gone);
        decrement(&mut self.by_weekday, &evicted.day_of_week, gone);

        // Every event within `window` of the evicted one paired with it once,
        // unless the same id also sits between them and still pairs.
        for (i, later) in history.iter().take(self.window).enumerate() {
            let id = later.resource_id.as_str();
            if history.iter().take(i).any(|e| e.resource_id == gone) {
                break;
            }
            if id == gone {
                continue;
            }
            decrement(&mut self.cooccurrence, id, gone);
            decrement(&mut self.cooccurrence, gone, id);
        }

        if let Some(dir) = &evicted.context_directory {
            decrement(&mut self.directories, dir.as_str(), gone);
        }
    }

    /// Rebuild from scratch by replaying `events` in order.
    pub fn rebuild<'a>(window: usize, events: impl IntoIterator<Item = &'a AccessEvent>) -> Self {
        let mut models = Self::new(window);
        let mut replay = AccessHistory::new(window);
        for event in events {
            models.observe(&replay, event);
            replay.push(event.clone());
        }
        models
    }

    /// Observe `event`, append it to `history`, and forget whatever the
    /// append evicted.
    pub fn record(&mut self, history: &mut AccessHistory, event: AccessEvent) {
        self.observe(history, &event);
        if let Some(evicted) = history.push(event) {
            self.forget(history, &evicted);
        }
    }

    /// What followed `id`, and how often.
    pub fn successors(&self, id: &str) -> Option<&Histogram> {
        self.sequence.get(id)
    }

    /// What was accessed near `id`, and how often.
    pub fn co_occurring(&self, id: &str) -> Option<&Histogram> {
        self.cooccurrence.get(id)
    }

    pub fn hour(&self, hour: u8) -> Option<&Histogram> {
        self.by_hour.get(&hour)
    }

    pub fn weekday(&self, day: u8) -> Option<&Histogram> {
        self.by_weekday.get(&day)
    }

    /// Resources opened from `dir`, with access counts.
    pub fn directory(&self, dir: &str) -> Option<&Histogram> {
        self.directories.get(dir)
    }

    /// Distinct resources with sequence or co-occurrence data.
    pub fn tracked_resources(&self) -> usize {
        let mut ids: HashSet<&str> = self.sequence.keys().map(String::as_str).collect();
        ids.extend(self.cooccurrence.keys().map(String::as_str));
        ids.len()
    }
}
