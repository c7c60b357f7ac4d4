// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Storage-layer error type and its conversion into [`EngineError`].

use evalctl_core::EngineError;
use thiserror::Error;

/// Errors arising from the `SQLite`-backed store itself, distinct from
/// [`EngineError`] so storage internals (paths, raw `rusqlite` messages)
/// do not leak into the domain error taxonomy until converted.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Filesystem or connection I/O failure.
    #[error("store io error: {0}")]
    Io(String),
    /// The underlying `SQLite` engine reported an error.
    #[error("store db error: {0}")]
    Db(String),
    /// A row could not be decoded into a domain type.
    #[error("store decode error: {0}")]
    Decode(String),
    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// An optimistic-concurrency compare-and-set lost a race.
    #[error("stale write: {0}")]
    StaleWrite(String),
    /// Persisted history is inconsistent with the aggregate's recorded
    /// state.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// A migration file's checksum did not match what was recorded for
    /// that version.
    #[error("migration checksum mismatch for version {version}: recorded {recorded}, found {found}")]
    ChecksumMismatch {
        /// The migration version in conflict.
        version: i64,
        /// The checksum recorded in `schema_migrations`.
        recorded: String,
        /// The checksum computed from the file on disk.
        found: String,
    },
    /// [`crate::migrations::initialize_once`] was called with `force =
    /// false` against a database that already carries the baseline
    /// schema.
    #[error("database is already initialized; pass force = true to recreate it")]
    AlreadyInitialized,
}

impl From<SqliteStoreError> for EngineError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) | SqliteStoreError::Db(message) => {
                Self::Transient(message)
            }
            SqliteStoreError::Decode(message) => Self::Corruption(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
            SqliteStoreError::StaleWrite(message) => Self::StaleWrite(message),
            SqliteStoreError::Corrupt(message) => Self::Corruption(message),
            SqliteStoreError::ChecksumMismatch { version, recorded, found } => {
                Self::Corruption(format!(
                    "migration {version} checksum mismatch: recorded {recorded}, found {found}"
                ))
            }
            SqliteStoreError::AlreadyInitialized => {
                Self::Validation("database is already initialized".to_owned())
            }
        }
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use evalctl_core::EngineError;

    use super::SqliteStoreError;

    #[test]
    fn stale_write_converts_to_the_matching_engine_variant() {
        let converted: EngineError = SqliteStoreError::StaleWrite("use_cases/1".into()).into();
        assert!(matches!(converted, EngineError::StaleWrite(_)));
    }
}
