// evalctl-tasks/src/lib.rs
// ============================================================================
// Module: Eval Orchestrator Tasks
// Description: Upload orchestration, the four registered workflow task
//              handlers, and the worker pool that drains the durable queue.
// Purpose: Everything that turns an uploaded artifact or a completed task
//          into the next state transition and the next enqueued task.
// Dependencies: evalctl-core, evalctl-collab
// ============================================================================

//! ## Overview
//! This crate has no knowledge of SQLite. It depends only on
//! [`evalctl_core`]'s repository and queue traits (bundled here as
//! [`store::Store`]) and on [`evalctl_collab::Collaborators`]. A caller
//! (the CLI, a test) wires a concrete store and a collaborator bundle
//! together and either calls [`upload`]'s functions directly or starts a
//! [`worker::WorkerPool`] to drain the queue in the background.

pub mod handlers;
pub mod store;
pub mod upload;
pub mod worker;

pub use handlers::dispatch;
pub use store::Store;
pub use upload::{get_upload_requirements, upload_config, upload_dataset, upload_predictions, UploadRequirement};
pub use worker::{WorkerPool, WorkerPoolConfig};

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]
}
