//! Optimistic mutations: local apply, remote reconciliation, rollback,
//! undo/redo and offline replay.

mod conflict;
mod error;
mod events;
mod history;
mod manager;
mod offline;
mod record;
mod remote;
mod request;

pub use conflict::{AbortOnConflict, Conflict, ConflictPolicy, ConflictResolution, ProceedOnConflict};
pub use error::MutationError;
pub use events::{EventBus, Listener, MutationEvent, SubscriptionId};
pub use history::HistoryStack;
pub use manager::{
    DrainReport, MutationConfig, MutationStats, OptimisticMutationManager,
    OptimisticMutationManagerBuilder,
};
pub use offline::{OfflineQueue, PersistedMutation, QueuedMutation};
pub use record::{MutationRecord, MutationStatus};
pub use remote::{CustomEffect, RemoteEffect, RemoteExecutor};
pub use request::{ApplyFn, MutationOutcome, MutationRequest, RollbackFn, SnapshotFn};
