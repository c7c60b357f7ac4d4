// evalctl-tasks/src/worker.rs
// ============================================================================
// Module: Worker Pool
// Description: A fixed pool of OS threads draining the durable task queue.
// Purpose: Turn `TaskQueue::pick_next` into a running system: poll,
//          dispatch, record the outcome, and sleep when the queue is dry.
// Dependencies: evalctl-core, evalctl-collab
// ============================================================================

//! ## Overview
//! Each worker thread loops: claim the next dispatchable task, run its
//! handler, mark it completed or failed, repeat. An empty queue triggers a
//! bounded sleep rather than a busy spin. [`WorkerPool::shutdown`] asks
//! every worker to finish its current task and then return, and blocks
//! until all of them have.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use evalctl_collab::Collaborators;
use evalctl_core::{Task, TaskStatus};

use crate::handlers::dispatch;
use crate::store::Store;

/// Tuning knobs for a [`WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    /// Number of OS threads polling the queue concurrently.
    pub worker_count: usize,
    /// How long an idle worker sleeps between empty polls.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { worker_count: 4, poll_interval: Duration::from_secs(1) }
    }
}

/// A running pool of task-queue workers.
///
/// Dropping a pool without calling [`Self::shutdown`] leaves its threads
/// running detached; always shut down explicitly during an orderly exit.
pub struct WorkerPool {
    /// Flipped to request every worker thread return at its next poll.
    shutdown: Arc<AtomicBool>,
    /// Join handles for the spawned worker threads.
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.worker_count` threads, each polling `store` for
    /// dispatchable tasks and running them against `collaborators`.
    pub fn spawn<S>(store: Arc<S>, collaborators: Arc<Collaborators>, config: WorkerPoolConfig) -> Self
    where
        S: Store + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = (0..config.worker_count)
            .map(|worker_index| {
                let store = Arc::clone(&store);
                let collaborators = Arc::clone(&collaborators);
                let shutdown = Arc::clone(&shutdown);
                let poll_interval = config.poll_interval;
                thread::spawn(move || worker_loop(worker_index, &store, &collaborators, &shutdown, poll_interval))
            })
            .collect();
        Self { shutdown, handles }
    }

    /// Requests every worker finish its current task and return, then
    /// joins all of them.
    ///
    /// # Errors
    ///
    /// Returns an error string naming the first worker thread whose join
    /// panicked.
    pub fn shutdown(mut self) -> Result<(), String> {
        self.shutdown.store(true, Ordering::SeqCst);
        for (worker_index, handle) in self.handles.drain(..).enumerate() {
            handle
                .join()
                .map_err(|_| format!("worker {worker_index} panicked"))?;
        }
        Ok(())
    }
}

/// One worker thread's body: poll, dispatch, record, repeat until shutdown
/// is requested.
fn worker_loop<S: Store>(
    worker_index: usize,
    store: &S,
    collaborators: &Collaborators,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match store.pick_next() {
            Ok(Some(task)) => run_task(store, collaborators, &task, worker_index),
            Ok(None) => thread::sleep(poll_interval),
            Err(err) => {
                tracing::error!(worker_index, error = %err, "failed to poll task queue");
                thread::sleep(poll_interval);
            }
        }
    }
}

/// Dispatches one claimed task and records its outcome back to the queue.
///
/// Handlers run to completion uncancelled once started; the cooperative
/// checkpoint is here, right after a handler returns. If cancellation was
/// requested while this task was running, its outcome is discarded and
/// the task is finalized as `CANCELLED` instead of `COMPLETED`/`FAILED`.
fn run_task<S: Store>(store: &S, collaborators: &Collaborators, task: &Task, worker_index: usize) {
    tracing::info!(worker_index, task_id = %task.id, task_name = %task.task_name, "dispatching task");
    let outcome = dispatch(&task.task_name, store, collaborators, &task.args);

    match store.get_status(&task.id) {
        Ok(TaskStatus::CancelledRequested) => {
            tracing::info!(task_id = %task.id, "honoring cancellation requested mid-run");
            if let Err(err) = store.mark_cancelled(&task.id) {
                tracing::error!(task_id = %task.id, error = %err, "failed to mark task cancelled");
            }
            return;
        }
        Ok(_) => {}
        Err(err) => {
            tracing::error!(task_id = %task.id, error = %err, "failed to read task status after dispatch");
        }
    }

    match outcome {
        Ok(()) => {
            if let Err(err) = store.mark_completed(&task.id) {
                tracing::error!(task_id = %task.id, error = %err, "failed to mark task completed");
            }
        }
        Err(err) => {
            tracing::warn!(task_id = %task.id, error = %err, "task handler failed");
            if let Err(mark_err) = store.mark_failed(&task.id, &err.to_string()) {
                tracing::error!(task_id = %task.id, error = %mark_err, "failed to mark task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use evalctl_collab::Collaborators;
    use evalctl_core::{TaskQueue, TaskStatus};
    use evalctl_store::SqliteStore;
    use tempfile::TempDir;

    use super::run_task;

    #[test]
    fn cancellation_requested_mid_run_overrides_a_successful_outcome() {
        let blob_root = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let collaborators = Collaborators::with_builtins(blob_root.path())
            .unwrap_or_else(|err| panic!("collaborators: {err}"));
        let store = SqliteStore::open_in_memory().unwrap_or_else(|err| panic!("open store: {err}"));

        let task_id =
            TaskQueue::enqueue(&store, "send_notification", serde_json::json!({}), 0, 0)
                .unwrap_or_else(|err| panic!("enqueue: {err}"));
        let task = store
            .pick_next()
            .unwrap_or_else(|err| panic!("pick next: {err}"))
            .unwrap_or_else(|| panic!("task should be dispatchable"));

        // Requested after the worker already claimed the task, as it would
        // be if an operator cancels a task mid-flight.
        store
            .request_cancellation(&task_id)
            .unwrap_or_else(|err| panic!("request cancellation: {err}"));

        run_task(&store, &collaborators, &task, 0);

        let status = store.get_status(&task_id).unwrap_or_else(|err| panic!("status: {err}"));
        assert_eq!(status, TaskStatus::Cancelled);
    }
}
