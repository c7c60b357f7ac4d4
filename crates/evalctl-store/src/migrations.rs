// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Schema initialization and versioned migration application.
//!
//! [`auto_initialize`] runs the embedded baseline schema with
//! `CREATE TABLE IF NOT EXISTS` semantics and is safe to call on every
//! process start. [`apply_migrations`] additionally scans a directory of
//! `NNN_name.sql` files, applying any whose version is not yet recorded
//! in `schema_migrations`, and records a SHA-256 checksum of each.

use std::fs;
use std::path::Path;
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::SqliteStoreError;

/// The schema every fresh database starts with, compiled into the binary.
const BASELINE_SCHEMA: &str = include_str!("../migrations/001_initial.sql");
/// Version number the baseline schema is recorded under in `schema_migrations`.
const BASELINE_VERSION: i64 = 1;
/// Name the baseline schema is recorded under in `schema_migrations`.
const BASELINE_NAME: &str = "initial";

/// Runs the embedded baseline schema idempotently and records it in
/// `schema_migrations` on first run. Safe to call at every startup.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Db`] if the DDL fails, or
/// [`SqliteStoreError::ChecksumMismatch`] if a prior run recorded a
/// different checksum for the baseline version (the baseline changed
/// underneath an existing database).
pub fn auto_initialize(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            description TEXT
        );",
    )?;
    let checksum = checksum_of(BASELINE_SCHEMA.as_bytes());
    let recorded: Option<String> = tx
        .query_row(
            "SELECT checksum FROM schema_migrations WHERE version = ?1",
            params![BASELINE_VERSION],
            |row| row.get(0),
        )
        .optional()?;
    match recorded {
        Some(existing) if existing == checksum => {
            tx.commit()?;
            return Ok(());
        }
        Some(existing) => {
            return Err(SqliteStoreError::ChecksumMismatch {
                version: BASELINE_VERSION,
                recorded: existing,
                found: checksum,
            });
        }
        None => {}
    }
    let start = Instant::now();
    tx.execute_batch(BASELINE_SCHEMA)?;
    record_migration(&tx, BASELINE_VERSION, BASELINE_NAME, &checksum, start)?;
    tx.commit()?;
    Ok(())
}

/// Table names the baseline schema creates, in an order safe to `DROP` (a
/// table is dropped only after anything with a foreign key into it).
const BASELINE_TABLES: &[&str] = &[
    "use_case_state_history",
    "model_state_history",
    "activity_log",
    "tasks",
    "model_evaluations",
    "use_cases",
    "schema_migrations",
];

/// Creates the baseline schema exactly once. Unlike [`auto_initialize`],
/// a database that already carries the baseline is an error rather than a
/// silent no-op, unless `force` is set, in which case every baseline
/// table is dropped and recreated from scratch.
///
/// Intended for an explicit operator action (a `--init` flag, a bootstrap
/// script), not for the startup path every process takes.
///
/// # Errors
///
/// Returns [`SqliteStoreError::AlreadyInitialized`] if the database
/// already carries the baseline schema and `force` is `false`, or
/// [`SqliteStoreError::Db`] if the DDL fails.
pub fn initialize_once(connection: &mut Connection, force: bool) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    let already_initialized: bool = tx
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            params![],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();

    if already_initialized && !force {
        return Err(SqliteStoreError::AlreadyInitialized);
    }
    if already_initialized {
        for table in BASELINE_TABLES {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        }
    }

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            description TEXT
        );",
    )?;
    let checksum = checksum_of(BASELINE_SCHEMA.as_bytes());
    let start = Instant::now();
    tx.execute_batch(BASELINE_SCHEMA)?;
    record_migration(&tx, BASELINE_VERSION, BASELINE_NAME, &checksum, start)?;
    tx.commit()?;
    Ok(())
}

/// Scans `dir` for files named `NNN_name.sql`, applying in lexicographic
/// (hence version) order any whose version is not yet recorded.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Io`] if the directory cannot be read,
/// [`SqliteStoreError::ChecksumMismatch`] if a previously applied
/// version's file content no longer matches its recorded checksum, or
/// [`SqliteStoreError::Db`] if a migration's DDL fails (the failing
/// migration's transaction is rolled back and no partial record is
/// left behind).
pub fn apply_migrations(connection: &mut Connection, dir: &Path) -> Result<(), SqliteStoreError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| SqliteStoreError::Io(err.to_string()))? {
        let entry = entry.map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }
        let Some((version, name)) = parse_migration_file_name(file_name) else {
            continue;
        };
        entries.push((version, name, path));
    }
    entries.sort_by_key(|(version, _, _)| *version);

    for (version, name, path) in entries {
        let sql = fs::read_to_string(&path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        let checksum = checksum_of(sql.as_bytes());
        let tx = connection.transaction()?;
        let recorded: Option<String> = tx
            .query_row(
                "SELECT checksum FROM schema_migrations WHERE version = ?1",
                params![version],
                |row| row.get(0),
            )
            .optional()?;
        match recorded {
            Some(existing) if existing == checksum => {
                tx.commit()?;
                continue;
            }
            Some(existing) => {
                return Err(SqliteStoreError::ChecksumMismatch {
                    version,
                    recorded: existing,
                    found: checksum,
                });
            }
            None => {}
        }
        let start = Instant::now();
        tx.execute_batch(&sql)?;
        record_migration(&tx, version, &name, &checksum, start)?;
        tx.commit()?;
        tracing::info!(version, name = %name, "applied migration");
    }
    Ok(())
}

/// Inserts a `schema_migrations` row recording a just-applied migration.
fn record_migration(
    tx: &rusqlite::Transaction<'_>,
    version: i64,
    name: &str,
    checksum: &str,
    start: Instant,
) -> Result<(), SqliteStoreError> {
    let applied_at = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let elapsed_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
    tx.execute(
        "INSERT INTO schema_migrations (version, name, checksum, applied_at, execution_time_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![version, name, checksum, applied_at, elapsed_ms],
    )?;
    Ok(())
}

/// Hex-encoded SHA-256 digest of a migration file's contents.
fn checksum_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Parses a `NNN_name.sql` file name into its version number and name.
fn parse_migration_file_name(file_name: &str) -> Option<(i64, String)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (number, name) = stem.split_once('_')?;
    let version: i64 = number.parse().ok()?;
    Some((version, name.to_owned()))
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{initialize_once, parse_migration_file_name};
    use crate::error::SqliteStoreError;

    #[test]
    fn parses_numbered_migration_file_names() {
        let (version, name) = parse_migration_file_name("002_add_index.sql").unwrap_or_else(|| {
            (0, String::new())
        });
        assert_eq!(version, 2);
        assert_eq!(name, "add_index");
    }

    #[test]
    fn rejects_file_names_without_a_leading_number() {
        assert!(parse_migration_file_name("notes.sql").is_none());
    }

    #[test]
    fn initialize_once_rejects_a_second_call_without_force() -> Result<(), SqliteStoreError> {
        let mut connection = Connection::open_in_memory()?;
        initialize_once(&mut connection, false)?;
        let result = initialize_once(&mut connection, false);
        assert!(matches!(result, Err(SqliteStoreError::AlreadyInitialized)));
        Ok(())
    }

    #[test]
    fn initialize_once_recreates_the_schema_when_forced() -> Result<(), SqliteStoreError> {
        let mut connection = Connection::open_in_memory()?;
        initialize_once(&mut connection, false)?;
        connection.execute_batch(
            "INSERT INTO use_cases (
                id, name, team_email, state, config_file_key, dataset_file_key,
                quality_issues_json, evaluation_results_json, metadata_json,
                created_at, updated_at, version
             ) VALUES ('u1', 'n', 'e@example.com', 'AWAITING_CONFIG', NULL, NULL, '[]', '{}', '{}', \
             '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 0);",
        )?;
        initialize_once(&mut connection, true)?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM use_cases", [], |row| row.get(0))?;
        assert_eq!(count, 0);
        Ok(())
    }
}
