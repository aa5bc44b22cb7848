//! Mutation submissions and their outcomes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::remote::RemoteEffect;

/// Applies the local change.
pub type ApplyFn = Arc<dyn Fn() + Send + Sync>;
/// Restores local state from the snapshot.
pub type RollbackFn = Arc<dyn Fn(&Value) + Send + Sync>;
/// Captures the pre-mutation state.
pub type SnapshotFn = Box<dyn FnOnce() -> Value + Send>;

/// One optimistic update: a local change plus the remote effect that makes it
/// durable.
pub struct MutationRequest {
    pub(crate) id: Option<String>,
    pub(crate) entity: String,
    pub(crate) apply: ApplyFn,
    pub(crate) remote: RemoteEffect,
    pub(crate) rollback: Option<RollbackFn>,
    pub(crate) snapshot: Option<SnapshotFn>,
}

impl MutationRequest {
    pub fn new<F>(entity: impl Into<String>, apply: F, remote: RemoteEffect) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: None,
            entity: entity.into(),
            apply: Arc::new(apply),
            remote,
            rollback: None,
            snapshot: None,
        }
    }

    /// Without a rollback a failed mutation cannot be reverted locally and
    /// cannot be undone.
    pub fn with_rollback<F>(mut self, rollback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.rollback = Some(Arc::new(rollback));
        self
    }

    /// Capture state before `apply` runs. The value is handed to the rollback.
    pub fn with_snapshot<F>(mut self, snapshot: F) -> Self
    where
        F: FnOnce() -> Value + Send + 'static,
    {
        self.snapshot = Some(Box::new(snapshot));
        self
    }

    /// Use a caller-chosen id instead of a generated UUID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl std::fmt::Debug for MutationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationRequest")
            .field("id", &self.id)
            .field("entity", &self.entity)
            .field("remote", &self.remote)
            .field("reversible", &self.rollback.is_some())
            .finish()
    }
}

/// How a successful `update()` resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The remote effect succeeded.
    Committed { id: String, value: Value },
    /// Deferred until connectivity returns. Not a failure.
    Queued { id: String, offline: bool },
}

impl MutationOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Committed { id, .. } | Self::Queued { id, .. } => id,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Committed { value, .. } => Some(value),
            Self::Queued { .. } => None,
        }
    }
}
