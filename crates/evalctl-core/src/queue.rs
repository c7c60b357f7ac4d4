// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! The durable task queue seam.
//!
//! `evalctl-store` provides the SQLite-backed implementation; workers in
//! `evalctl-tasks` depend only on this trait.

use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use crate::error::EngineError;
use crate::ids::TaskId;

/// Where a [`Task`] sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker currently holds this task.
    Running,
    /// Finished without error.
    Completed,
    /// Exhausted its retry budget.
    Failed,
    /// Failed but within its retry budget; eligible for redispatch.
    Retrying,
    /// An operator requested cancellation; cooperative, not yet honored.
    CancelledRequested,
    /// Cancellation was honored.
    Cancelled,
}

impl TaskStatus {
    /// Whether a task in this status may still be picked up by a worker.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    /// Whether this status is a final resting state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Names of every task handler a worker pool knows how to dispatch.
///
/// [`TaskQueue::enqueue`] implementations validate against this list so a
/// typo in a caller's `task_name` is rejected at enqueue time rather than
/// surfacing as a permanently stuck `PENDING` row nothing ever dispatches.
pub const REGISTERED_TASK_NAMES: &[&str] =
    &["validate_config", "run_quality_check", "run_evaluation", "send_notification"];

/// One unit of queued background work.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Task {
    /// Opaque identifier.
    pub id: TaskId,
    /// Name of the registered handler that executes this task.
    pub task_name: String,
    /// Arguments passed to the handler, as a JSON value.
    pub args: Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Dispatch priority; higher values are picked up first.
    pub priority: i64,
    /// How many times this task has been retried so far.
    pub retry_count: u32,
    /// The maximum number of retries before the task is marked failed.
    pub max_retries: u32,
    /// When the task was enqueued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When a worker first picked the task up, if it has been.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// When the task reached a terminal status, if it has.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// The error from the most recent failed attempt, if any.
    pub error_message: Option<String>,
}

/// Durable, at-least-once task queue.
pub trait TaskQueue: Send + Sync {
    /// Enqueues a new task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownTask`] if `task_name` is not one of
    /// [`REGISTERED_TASK_NAMES`], [`EngineError::Transient`] on a
    /// retryable storage failure.
    fn enqueue(
        &self,
        task_name: &str,
        args: Value,
        priority: i64,
        max_retries: u32,
    ) -> Result<TaskId, EngineError>;

    /// Atomically claims the highest-priority dispatchable task, marking
    /// it `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn pick_next(&self) -> Result<Option<Task>, EngineError>;

    /// Marks a task `COMPLETED`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the task does not exist.
    fn mark_completed(&self, id: &TaskId) -> Result<(), EngineError>;

    /// Records a failed attempt. Moves the task to `RETRYING` if its
    /// retry budget is not exhausted, otherwise to `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the task does not exist.
    fn mark_failed(&self, id: &TaskId, error_message: &str) -> Result<(), EngineError>;

    /// Fetches a task's current status.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the task does not exist.
    fn get_status(&self, id: &TaskId) -> Result<TaskStatus, EngineError>;

    /// Requests cooperative cancellation of a task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the task does not exist,
    /// [`EngineError::Validation`] if it is already terminal.
    fn request_cancellation(&self, id: &TaskId) -> Result<(), EngineError>;

    /// Finalizes a task whose cancellation was requested while a worker
    /// was running it, moving it to `CANCELLED` regardless of the
    /// handler's own outcome. A no-op (returns `Ok` without changing the
    /// row) if cancellation was never requested for this task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the task does not exist.
    fn mark_cancelled(&self, id: &TaskId) -> Result<(), EngineError>;

    /// Counts tasks in each status.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn queue_stats(&self) -> Result<BTreeMap<TaskStatus, usize>, EngineError>;

    /// Deletes terminal tasks older than `older_than_days`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn cleanup(&self, older_than_days: u32) -> Result<usize, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::TaskStatus;

    #[test]
    fn only_pending_and_retrying_are_dispatchable() {
        assert!(TaskStatus::Pending.is_dispatchable());
        assert!(TaskStatus::Retrying.is_dispatchable());
        assert!(!TaskStatus::Running.is_dispatchable());
        assert!(!TaskStatus::Completed.is_dispatchable());
    }

    #[test]
    fn terminal_statuses_are_final() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::CancelledRequested.is_terminal());
    }
}
