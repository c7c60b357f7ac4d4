// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Connection configuration for [`crate::SqliteStore`].

use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// `SQLite` synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest, default).
    #[default]
    Full,
    /// Normal synchronous mode (balanced, acceptable under WAL).
    Normal,
}

impl SqliteSyncMode {
    /// The literal pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for opening the `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file. A special value of `:memory:` opens an
    /// in-process database, used by tests.
    pub path: PathBuf,
    /// Busy timeout in milliseconds before a locked-database error is
    /// returned to the caller.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Synchronous mode. Journal mode is always WAL; it is the only mode
    /// that lets the worker pool read while a writer holds the
    /// connection.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Directory containing `NNN_name.sql` migration files, applied in
    /// addition to the embedded baseline schema.
    pub migrations_dir: Option<PathBuf>,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl SqliteStoreConfig {
    /// Convenience constructor for the common case: no extra migrations
    /// directory, default timeouts.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: default_busy_timeout_ms(),
            sync_mode: SqliteSyncMode::default(),
            migrations_dir: None,
        }
    }
}
