// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! The repository seam: the single bridge between storage and the
//! in-memory state machines.
//!
//! `evalctl-store` provides the SQLite-backed implementation; the trait
//! is defined here so `evalctl-tasks` can depend on it without depending
//! on SQLite directly.

use std::collections::BTreeMap;

use crate::entities::{ActivityLog, ModelEvaluation, UseCase};
use crate::error::EngineError;
use crate::ids::{ModelId, UseCaseId};
use crate::state::StateMachine;
use crate::transitions::{ModelEvaluationState, UseCaseState};

/// Persistence operations for use cases and their state machines.
pub trait UseCaseRepository: Send + Sync {
    /// Inserts a newly created use case.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn create(&self, use_case: &UseCase) -> Result<(), EngineError>;

    /// Fetches a use case by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no such use case exists.
    fn get(&self, id: &UseCaseId) -> Result<UseCase, EngineError>;

    /// Lists use cases, optionally filtered by exact state, paginated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn list(
        &self,
        state: Option<UseCaseState>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UseCase>, EngineError>;

    /// Finds use cases whose `team_email` matches exactly.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn find_by_team_email(&self, team_email: &str) -> Result<Vec<UseCase>, EngineError>;

    /// Finds use cases whose `name` contains `needle` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn search_by_name(&self, needle: &str) -> Result<Vec<UseCase>, EngineError>;

    /// Persists mutated fields of an existing use case.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StaleWrite`] if `updated_at` no longer
    /// matches the stored row, [`EngineError::NotFound`] if the use case
    /// was deleted concurrently.
    fn update(&self, use_case: &UseCase) -> Result<(), EngineError>;

    /// Permanently removes a use case and every model evaluation,
    /// history row, and activity log entry owned by it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn delete(&self, id: &UseCaseId) -> Result<(), EngineError>;

    /// Reconstructs the use case's state machine with full history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no such use case exists,
    /// [`EngineError::Corruption`] if the persisted history is
    /// inconsistent with the aggregate's recorded state.
    fn load_state_machine(&self, id: &UseCaseId) -> Result<StateMachine<UseCaseState>, EngineError>;

    /// Persists a mutated state machine, appending any new history
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StaleWrite`] on an optimistic-concurrency
    /// conflict.
    fn save_state_machine(
        &self,
        id: &UseCaseId,
        sm: &StateMachine<UseCaseState>,
    ) -> Result<(), EngineError>;

    /// Counts use cases in each state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn state_summary(&self) -> Result<BTreeMap<UseCaseState, usize>, EngineError>;

    /// Appends an audit entry unrelated to a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn log_activity(&self, entry: &ActivityLog) -> Result<(), EngineError>;
}

/// Persistence operations for model evaluations and their state
/// machines.
pub trait ModelRepository: Send + Sync {
    /// Inserts a newly registered model evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the owning use case does not
    /// exist, [`EngineError::Transient`] on a retryable storage failure.
    fn create(&self, model: &ModelEvaluation) -> Result<(), EngineError>;

    /// Fetches a model evaluation by id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no such model exists.
    fn get(&self, id: &ModelId) -> Result<ModelEvaluation, EngineError>;

    /// Lists every model evaluation attached to a use case.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn list_for_use_case(&self, use_case_id: &UseCaseId) -> Result<Vec<ModelEvaluation>, EngineError>;

    /// Finds model ids in `use_case_id` currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn find_by_state(
        &self,
        use_case_id: &UseCaseId,
        state: ModelEvaluationState,
    ) -> Result<Vec<ModelId>, EngineError>;

    /// Groups model ids under states that require operator or team
    /// action: `AWAITING_DATA_FIX`, `QUALITY_CHECK_FAILED`, and
    /// `EVALUATION_FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn needing_action(
        &self,
        use_case_id: &UseCaseId,
    ) -> Result<BTreeMap<ModelEvaluationState, Vec<ModelId>>, EngineError>;

    /// Persists mutated fields of an existing model evaluation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StaleWrite`] if `updated_at` no longer
    /// matches the stored row.
    fn update(&self, model: &ModelEvaluation) -> Result<(), EngineError>;

    /// Reconstructs the model's state machine with full history.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if no such model exists,
    /// [`EngineError::Corruption`] if the persisted history is
    /// inconsistent with the aggregate's recorded state.
    fn load_state_machine(
        &self,
        id: &ModelId,
    ) -> Result<StateMachine<ModelEvaluationState>, EngineError>;

    /// Persists a mutated state machine, appending any new history
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StaleWrite`] on an optimistic-concurrency
    /// conflict.
    fn save_state_machine(
        &self,
        id: &ModelId,
        sm: &StateMachine<ModelEvaluationState>,
    ) -> Result<(), EngineError>;
}
