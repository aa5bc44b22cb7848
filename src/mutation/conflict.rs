//! Conflict policy for overlapping mutations on one entity.

/// Another open mutation already targets the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The incoming mutation.
    pub id: String,
    pub entity: String,
    /// The open mutation it overlaps with.
    pub conflicting_id: String,
}

/// What to do with the incoming mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Apply it anyway; last writer wins locally.
    Proceed,
    /// Reject it with `MutationError::Conflict`; nothing is applied.
    Abort,
}

/// Pluggable conflict handling. The conflict event is emitted before the
/// policy runs, whatever it decides.
pub trait ConflictPolicy: Send + Sync {
    fn resolve(&self, conflict: &Conflict) -> ConflictResolution;
}

/// Client wins: the newer local change goes ahead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceedOnConflict;

impl ConflictPolicy for ProceedOnConflict {
    fn resolve(&self, _conflict: &Conflict) -> ConflictResolution {
        ConflictResolution::Proceed
    }
}

/// Server wins: the in-flight change stands and the newer one is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnConflict;

impl ConflictPolicy for AbortOnConflict {
    fn resolve(&self, _conflict: &Conflict) -> ConflictResolution {
        ConflictResolution::Abort
    }
}

impl<F> ConflictPolicy for F
where
    F: Fn(&Conflict) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict) -> ConflictResolution {
        self(conflict)
    }
}
