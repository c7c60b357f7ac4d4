// evalctl-store/tests/migrations.rs
// ============================================================================
// Module: Migration Application Tests
// Description: Verify baseline schema idempotence, migration ordering, and
//              checksum-mismatch detection against a real database file.
// Purpose: Guard the durability guarantees migrations.rs is relied on for.
// Dependencies: evalctl-store, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions and fixtures are permitted."
)]

use std::fs;

use evalctl_store::{SqliteStore, SqliteStoreConfig, SqliteStoreError};
use tempfile::TempDir;

#[test]
fn opening_the_same_database_twice_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("evalctl.db");
    let config = SqliteStoreConfig::new(&path);

    let first = SqliteStore::open(&config).expect("first open");
    drop(first);
    let second = SqliteStore::open(&config).expect("second open replays the baseline safely");
    drop(second);
}

#[test]
fn extra_migrations_directory_is_applied_on_top_of_the_baseline() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("evalctl.db");
    let migrations_dir = dir.path().join("migrations");
    fs::create_dir_all(&migrations_dir).expect("create migrations dir");
    fs::write(
        migrations_dir.join("002_add_priority_index.sql"),
        "CREATE INDEX IF NOT EXISTS idx_tasks_priority_extra ON tasks (priority);",
    )
    .expect("write migration file");

    let mut config = SqliteStoreConfig::new(&path);
    config.migrations_dir = Some(migrations_dir.clone());
    let store = SqliteStore::open(&config).expect("open with extra migration");
    drop(store);

    let reopened = SqliteStore::open(&config).expect("reopen replays migration 2 safely");
    drop(reopened);
}

#[test]
fn a_changed_migration_file_is_rejected_on_replay() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("evalctl.db");
    let migrations_dir = dir.path().join("migrations");
    fs::create_dir_all(&migrations_dir).expect("create migrations dir");
    let migration_path = migrations_dir.join("002_add_priority_index.sql");
    fs::write(&migration_path, "CREATE INDEX IF NOT EXISTS idx_one ON tasks (priority);")
        .expect("write migration file");

    let mut config = SqliteStoreConfig::new(&path);
    config.migrations_dir = Some(migrations_dir);
    let store = SqliteStore::open(&config).expect("open with migration");
    drop(store);

    fs::write(&migration_path, "CREATE INDEX IF NOT EXISTS idx_two ON tasks (priority);")
        .expect("rewrite migration file with different content");

    let result = SqliteStore::open(&config);
    assert!(matches!(result, Err(SqliteStoreError::ChecksumMismatch { .. })));
}
