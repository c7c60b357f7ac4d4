// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! The engine's error taxonomy: kinds, not types.
//!
//! Every fallible boundary in the workspace ultimately returns (or
//! converts into) [`EngineError`]. Storage- and collaborator-specific
//! errors are narrower enums that implement `From` into this one, the same
//! way the store crate's own error type converts upward.

use thiserror::Error;

/// The engine's unified error type.
///
/// Variants correspond to the taxonomy entries documented for the
/// orchestration core: validation failures and invalid transitions are
/// surfaced to the caller untouched; `StaleWrite` is retried a bounded
/// number of times by the repository caller; `Transient` failures inside a
/// task handler are turned into a queue retry; `Corruption` is never
/// auto-repaired.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller supplied input that fails a structural check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested `(from, to)` transition is not in the transition
    /// table and `force` was not set.
    #[error("cannot transition from {from} to {to}")]
    InvalidTransition {
        /// The state the aggregate was in.
        from: String,
        /// The state that was requested.
        to: String,
    },

    /// An upload arrived while the owning aggregate was not in a state
    /// that accepts it.
    #[error("{kind} upload rejected: aggregate is in state {state}")]
    InvalidStateForUpload {
        /// Which artifact kind was being uploaded.
        kind: String,
        /// The aggregate's current state at rejection time.
        state: String,
    },

    /// The requested aggregate, task, or migration does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency compare-and-set lost a race.
    #[error("stale write: {0} was modified by another writer")]
    StaleWrite(String),

    /// A retryable failure in storage, object storage, or a collaborator.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A non-retryable failure surfaced by a collaborator.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Persisted history is inconsistent with the aggregate's recorded
    /// current state. Never auto-repaired; an operator must intervene.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// A task handler name was not present in the registry at enqueue
    /// time.
    #[error("unknown task handler: {0}")]
    UnknownTask(String),
}

impl EngineError {
    /// True when retrying the same operation without operator
    /// intervention might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::StaleWrite(_))
    }
}

#[cfg(test)]
mod tests {
    use super::EngineError;

    #[test]
    fn transient_and_stale_write_are_retryable() {
        assert!(EngineError::Transient("db busy".into()).is_retryable());
        assert!(EngineError::StaleWrite("use_case/1".into()).is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!EngineError::Validation("bad input".into()).is_retryable());
    }
}
