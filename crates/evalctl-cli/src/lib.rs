// evalctl-cli/src/lib.rs
// ============================================================================
// Module: Eval Orchestrator CLI Library
// Description: Shared helpers for the evalctl command-line interface.
// Purpose: Keep the layered configuration type testable independently of
//          the binary entry point.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! The binary entry point (`src/main.rs`) wires a [`config::EngineConfig`]
//! into a `SqliteStore`, a `Collaborators` bundle, and either the upload
//! orchestrator or a worker pool, depending on the subcommand.

/// Layered configuration: TOML file plus environment-variable overrides.
pub mod config;
