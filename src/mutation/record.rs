//! Mutation records and their lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of an optimistic mutation.
///
/// `Pending -> Applied -> Committed` on success,
/// `Pending -> Applied -> Failed -> RolledBack` on failure, with a
/// `Failed -> Pending` loop while retries remain. Undo and redo work on the
/// undo history and leave a committed record's status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Applied,
    Committed,
    Failed,
    RolledBack,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Still holding the entity for conflict detection.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Applied | Self::Failed)
    }

    pub fn can_transition_to(&self, next: MutationStatus) -> bool {
        use MutationStatus::*;
        matches!(
            (self, next),
            (Pending, Applied)
                | (Applied, Committed)
                | (Applied, Failed)
                | (Failed, Pending)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub id: String,
    pub entity: String,
    pub snapshot: Value,
    pub status: MutationStatus,
    pub retry_count: u32,
    /// Whether the remote effect was deferred while offline.
    pub offline: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl MutationRecord {
    pub fn new(id: String, entity: String, snapshot: Value, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entity,
            snapshot,
            status: MutationStatus::Pending,
            retry_count: 0,
            offline: false,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&mut self, next: MutationStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                mutation_id = %self.id,
                from = %self.status,
                to = %next,
                "illegal mutation transition ignored"
            );
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn happy_and_failure_paths_are_legal() {
        use MutationStatus::*;
        for path in [
            &[Pending, Applied, Committed][..],
            &[Pending, Applied, Failed, RolledBack][..],
            &[Pending, Applied, Failed, Pending, Applied, Committed][..],
        ] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn illegal_transition_is_ignored() {
        let now = Utc::now();
        let mut record = MutationRecord::new("m1".into(), "note:1".into(), json!(null), now);
        assert!(!record.transition(MutationStatus::Committed, now));
        assert_eq!(record.status, MutationStatus::Pending);
        assert!(record.transition(MutationStatus::Applied, now));
    }

    #[test]
    fn terminal_states_are_final() {
        use MutationStatus::*;
        for from in [Committed, RolledBack] {
            for to in [Pending, Applied, Committed, Failed, RolledBack] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn open_and_terminal_are_disjoint() {
        use MutationStatus::*;
        for s in [Pending, Applied, Committed, Failed, RolledBack] {
            assert!(!(s.is_open() && s.is_terminal()));
        }
    }
}
