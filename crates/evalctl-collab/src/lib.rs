// evalctl-collab/src/lib.rs
// ============================================================================
// Module: Evaluation Orchestrator Collaborators
// Description: Built-in, zero-config implementations of the engine's four
//              narrow collaborator traits, plus a bundle to wire them in.
// Purpose: Let a deployment run without any external quality-check,
//          evaluation, storage, or notification service configured.
// Dependencies: evalctl-core, jsonpath_lib, serde, serde_json
// ============================================================================

//! ## Overview
//! This crate ships built-in implementations of `evalctl_core`'s collaborator
//! traits: a field-rule dataset quality checker, a field-match evaluator, a
//! filesystem-backed object store, and a logging notifier. [`Collaborators`]
//! bundles one instance of each for a single wiring point at startup.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod evaluator;
pub mod notifier;
pub mod object_store;
pub mod quality;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use evaluator::FieldMatchEvaluator;
pub use notifier::LoggingNotifier;
pub use object_store::FilesystemObjectStore;
pub use quality::FieldRuleQualityChecker;
pub use registry::Collaborators;

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
