// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Domain model and orchestration core for the evaluation engine.
//!
//! This crate has no knowledge of SQLite, the task queue's worker loop, or
//! any transport. It defines the aggregates, the two state machines that
//! drive them, the error taxonomy, and the narrow collaborator traits that
//! the rest of the workspace implements.

pub mod entities;
pub mod error;
pub mod ids;
pub mod interfaces;
pub mod queue;
pub mod repository;
pub mod state;
pub mod transitions;

pub use entities::{
    ActivityLog, ModelEvaluation, QualityIssue, Severity, UseCase,
};
pub use error::EngineError;
pub use ids::{ModelId, TaskId, UseCaseId};
pub use interfaces::{Evaluator, Notification, Notifier, ObjectStore, QualityChecker};
pub use queue::{Task, TaskQueue, TaskStatus, REGISTERED_TASK_NAMES};
pub use repository::{ModelRepository, UseCaseRepository};
pub use state::{HistoryEntry, StateMachine};
pub use transitions::{ModelEvaluationState, UseCaseState};
