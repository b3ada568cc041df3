//! Writes with optimistic updates and exact rollback.

mod engine;
mod handle;
mod projection;
mod snapshot;

pub use engine::{MutationEngine, MutationOptions, MutationOutcome, WriteArgs};
pub use handle::{MutationHandle, MutationState};
pub use projection::Projection;
pub use snapshot::OptimisticSnapshot;
