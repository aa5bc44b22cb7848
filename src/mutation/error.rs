//! Mutation manager errors.

use thiserror::Error;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum MutationError {
    /// Refused by the conflict policy. Nothing was applied.
    #[error("mutation on {entity} conflicts with in-flight mutation {conflicting_id}")]
    Conflict { entity: String, conflicting_id: String },

    /// The remote effect failed terminally and the local change was reverted.
    #[error("mutation {id} rolled back: {reason}")]
    RolledBack { id: String, reason: String },

    /// A mutation with this id is still open.
    #[error("mutation {id} is already in flight")]
    DuplicateId { id: String },

    #[error("mutation manager is shutting down")]
    ShuttingDown,

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    /// The mutation has no rollback, so it cannot be undone.
    #[error("mutation {id} cannot be undone")]
    NotReversible { id: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl MutationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
