// evalctl-tasks/src/store.rs
// ============================================================================
// Module: Store
// Description: The combined repository and queue seam task handlers and
//              the worker pool are generic over.
// Purpose: Let this crate depend only on `evalctl-core`'s traits, never on
//          a concrete storage backend.
// Dependencies: evalctl-core
// ============================================================================

use evalctl_core::{ModelRepository, TaskQueue, UseCaseRepository};

/// Everything a task handler or the worker pool needs from storage: the
/// two repositories plus the task queue, all on one object.
///
/// Blanket-implemented for any type that already satisfies all three;
/// callers never implement it directly.
pub trait Store: UseCaseRepository + ModelRepository + TaskQueue {}

impl<T> Store for T where T: UseCaseRepository + ModelRepository + TaskQueue {}
