//! Task prioritization.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Dispatch tier for scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

struct Entry<T> {
    priority: Priority,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            // Max-heap: the smaller sequence (older item) must compare greater.
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Max-priority queue, FIFO within a tier.
///
/// Ordering is evaluated on every `pop`, so a late high-priority push
/// overtakes anything still waiting in a lower tier.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_sequence: u64,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_sequence: 0 }
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry { priority, sequence, item });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.item)
    }

    pub fn peek_priority(&self) -> Option<Priority> {
        self.heap.peek().map(|e| e.priority)
    }

    /// Remove every item, highest priority first.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }

    /// Count of waiting items per tier as `(high, normal, low)`.
    pub fn depth_by_priority(&self) -> (usize, usize, usize) {
        self.heap.iter().fold((0, 0, 0), |(h, n, l), e| match e.priority {
            Priority::High => (h + 1, n, l),
            Priority::Normal => (h, n + 1, l),
            Priority::Low => (h, n, l + 1),
        })
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_tier_pops_first() {
        let mut q = PriorityQueue::new();
        q.push("low", Priority::Low);
        q.push("high", Priority::High);
        q.push("normal", Priority::Normal);
        assert_eq!(q.drain_ordered(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn fifo_within_tier() {
        let mut q = PriorityQueue::new();
        for name in ["a", "b", "c"] {
            q.push(name, Priority::Normal);
        }
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("c"));
        assert!(q.is_empty());
    }

    #[test]
    fn late_high_overtakes_waiting_low() {
        let mut q = PriorityQueue::new();
        q.push(1, Priority::Low);
        q.push(2, Priority::Low);
        assert_eq!(q.pop(), Some(1));
        q.push(3, Priority::High);
        assert_eq!(q.peek_priority(), Some(Priority::High));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn depth_by_priority_counts_tiers() {
        let mut q = PriorityQueue::new();
        q.push((), Priority::High);
        q.push((), Priority::Low);
        q.push((), Priority::Low);
        assert_eq!(q.depth_by_priority(), (1, 0, 2));
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }
}
