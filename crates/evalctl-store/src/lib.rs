// Copyright (c) 2026 Michael Campbell. All rights reserved.
// evalctl-store/src/lib.rs
// ============================================================================
// Module: SQLite Store
// Description: Durable repositories and task queue backed by SQLite.
// Purpose: Bridge the in-memory domain model to relational persistence.
// Dependencies: evalctl-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate persists use cases, model evaluations, their state
//! histories, and the task queue in a single `SQLite` database. It is the
//! only crate in the workspace that speaks SQL; everything above it talks
//! to [`SqliteStore`] through the `evalctl-core` repository and queue
//! traits.

pub mod config;
pub mod error;
pub mod migrations;
pub mod store;

pub use config::{SqliteStoreConfig, SqliteSyncMode};
pub use error::SqliteStoreError;
pub use store::{reconcile_pending_work, SqliteStore};
