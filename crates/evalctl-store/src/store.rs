// Copyright (c) 2026 Michael Campbell. All rights reserved.
// evalctl-store/src/store.rs
// ============================================================================
// Module: SQLite Store
// Description: Repository and task queue implementations over SQLite.
// Purpose: Single bridge between relational storage and the in-memory
//          domain model and state machines.
// Dependencies: evalctl-core, rusqlite, serde_json, sha2, time
// ============================================================================

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use evalctl_core::transitions::{ModelEvaluationState, UseCaseState};
use evalctl_core::{
    ActivityLog, EngineError, HistoryEntry, ModelEvaluation, ModelId, ModelRepository,
    QualityIssue, StateMachine, Task, TaskId, TaskQueue, TaskStatus, UseCase, UseCaseId,
    UseCaseRepository, REGISTERED_TASK_NAMES,
};
use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::migrations::{apply_migrations, auto_initialize, initialize_once};

// ============================================================================
// SECTION: Connection wrapper
// ============================================================================

/// Thin wrapper around a locked `SQLite` connection (or an open
/// transaction) that converts every `rusqlite` error into
/// [`SqliteStoreError`] at the point of the call.
///
/// `rusqlite::Error` and `EngineError` are both foreign to this crate, so
/// a direct `?`-conversion between them is not possible under Rust's
/// orphan rule; this wrapper is where that conversion actually happens,
/// once, instead of at every call site.
struct Conn<'c>(&'c Connection);

impl Conn<'_> {
    /// Runs a statement with no result rows, returning the affected row count.
    fn execute(&self, sql: &str, p: impl rusqlite::Params) -> Result<usize, SqliteStoreError> {
        self.0.execute(sql, p).map_err(SqliteStoreError::from)
    }

    /// Runs a batch of semicolon-separated statements with no bound parameters.
    fn execute_batch(&self, sql: &str) -> Result<(), SqliteStoreError> {
        self.0.execute_batch(sql).map_err(SqliteStoreError::from)
    }

    /// Runs a query expected to return zero or one row.
    fn query_row_opt<T>(
        &self,
        sql: &str,
        p: impl rusqlite::Params,
        f: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>, SqliteStoreError> {
        use rusqlite::OptionalExtension;
        self.0.query_row(sql, p, f).optional().map_err(SqliteStoreError::from)
    }

    /// Runs a query expected to return exactly one row.
    fn query_row_one<T>(
        &self,
        sql: &str,
        p: impl rusqlite::Params,
        f: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<T, SqliteStoreError> {
        self.0.query_row(sql, p, f).map_err(SqliteStoreError::from)
    }

    /// Runs a query and collects every row into a `Vec`.
    fn query_rows<T>(
        &self,
        sql: &str,
        p: impl rusqlite::Params,
        f: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, SqliteStoreError> {
        let mut stmt = self.0.prepare(sql).map_err(SqliteStoreError::from)?;
        let mapped = stmt.query_map(p, f).map_err(SqliteStoreError::from)?;
        let mut out = Vec::new();
        for row in mapped {
            out.push(row.map_err(SqliteStoreError::from)?);
        }
        Ok(out)
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed implementation of every repository and queue trait
/// the engine core depends on.
///
/// Holds a single connection behind a mutex. `SQLite`'s WAL journal mode
/// lets readers proceed concurrently with a writer, but `rusqlite`'s
/// `Connection` is `!Sync`, so all access is serialized through the
/// mutex; the task queue's dispatch step additionally relies on an
/// immediate transaction to make claiming a task atomic.
#[derive(Clone)]
pub struct SqliteStore {
    /// The single underlying connection, shared across clones of the store.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if necessary) a `SQLite` database at
    /// `config.path`, applies pragmas, runs the embedded baseline schema,
    /// and applies any migrations found in `config.migrations_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the file cannot be opened or the
    /// schema cannot be initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection =
            Connection::open_with_flags(&config.path, flags).map_err(SqliteStoreError::from)?;
        apply_pragmas(&connection, config)?;
        auto_initialize(&mut connection)?;
        if let Some(dir) = &config.migrations_dir {
            apply_migrations(&mut connection, dir)?;
        }
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Opens (creating if necessary) a `SQLite` database at
    /// `config.path`, requiring a first-time bootstrap rather than the
    /// idempotent `CREATE TABLE IF NOT EXISTS` semantics [`Self::open`]
    /// uses at every startup.
    ///
    /// Intended for an explicit `evalctl init` style operator action. A
    /// database that already carries the baseline schema is rejected
    /// unless `force` is set, in which case it is dropped and recreated.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::AlreadyInitialized`] if the database
    /// already carries the baseline schema and `force` is `false`, or
    /// [`SqliteStoreError`] if the file cannot be opened or the schema
    /// cannot be applied.
    pub fn initialize_once(config: &SqliteStoreConfig, force: bool) -> Result<Self, SqliteStoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection =
            Connection::open_with_flags(&config.path, flags).map_err(SqliteStoreError::from)?;
        apply_pragmas(&connection, config)?;
        initialize_once(&mut connection, force)?;
        if let Some(dir) = &config.migrations_dir {
            apply_migrations(&mut connection, dir)?;
        }
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Opens a private in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let mut connection = Connection::open_in_memory().map_err(SqliteStoreError::from)?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(SqliteStoreError::from)?;
        auto_initialize(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Locks the connection, mapping mutex poisoning to a storage error.
    fn guard(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Io("store mutex poisoned".to_owned()))
    }
}

/// Applies the journal mode, synchronous level, and busy timeout a durable store needs.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
        .map_err(SqliteStoreError::from)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(SqliteStoreError::from)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(SqliteStoreError::from)?;
    Ok(())
}

// ============================================================================
// SECTION: Encoding helpers
// ============================================================================

/// Returns the current time, used for `updated_at`/`created_at` stamps.
fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Formats a timestamp as RFC 3339 for storage as a `TEXT` column.
fn format_ts(ts: OffsetDateTime) -> Result<String, SqliteStoreError> {
    ts.format(&Rfc3339).map_err(|err| SqliteStoreError::Decode(err.to_string()))
}

/// Parses an RFC 3339 `TEXT` column back into a timestamp.
fn parse_ts(raw: &str) -> Result<OffsetDateTime, SqliteStoreError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| SqliteStoreError::Decode(err.to_string()))
}

/// Serializes a value to a JSON string for storage in a `TEXT` column.
fn to_json<T: Serialize>(value: &T) -> Result<String, SqliteStoreError> {
    serde_json::to_string(value).map_err(|err| SqliteStoreError::Decode(err.to_string()))
}

/// Deserializes a value out of a JSON `TEXT` column.
fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, SqliteStoreError> {
    serde_json::from_str(raw).map_err(|err| SqliteStoreError::Decode(err.to_string()))
}

/// Encodes an enum state as the bare string `SQLite` stores it as.
fn state_to_str<S: Serialize>(state: &S) -> Result<String, SqliteStoreError> {
    match serde_json::to_value(state).map_err(|err| SqliteStoreError::Decode(err.to_string()))? {
        Value::String(s) => Ok(s),
        other => Err(SqliteStoreError::Decode(format!("state did not encode as a string: {other}"))),
    }
}

/// Decodes an enum state out of the bare string `SQLite` stores it as.
fn str_to_state<S: DeserializeOwned>(raw: &str) -> Result<S, SqliteStoreError> {
    serde_json::from_value(Value::String(raw.to_owned()))
        .map_err(|err| SqliteStoreError::Decode(err.to_string()))
}

/// Rebuilds a state machine from its persisted current state and history,
/// mapping a broken invariant to a storage corruption error.
fn state_machine_from_parts<S: evalctl_core::transitions::TransitionTable>(
    current: S,
    history: Vec<HistoryEntry<S>>,
) -> Result<StateMachine<S>, SqliteStoreError> {
    StateMachine::from_parts(current, history).map_err(|err| SqliteStoreError::Corrupt(err.to_string()))
}

// ============================================================================
// SECTION: UseCaseRepository
// ============================================================================

/// Raw column tuple for one row of the `use_cases` table, in `USE_CASE_COLUMNS` order.
type UseCaseRowFields = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
    String,
);

/// Maps one `use_cases` row into its raw column tuple.
fn map_use_case_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UseCaseRowFields> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?,
    ))
}

/// Decodes a raw column tuple into a domain [`UseCase`].
fn build_use_case(fields: UseCaseRowFields) -> Result<UseCase, SqliteStoreError> {
    let (
        id, name, team_email, state, config_file_key, dataset_file_key, quality_issues_json,
        evaluation_results_json, metadata_json, created_at, updated_at,
    ) = fields;
    Ok(UseCase {
        id: UseCaseId::from_raw(id),
        name,
        team_email,
        state: str_to_state::<UseCaseState>(&state)?,
        config_file_key,
        dataset_file_key,
        quality_issues: from_json::<Vec<QualityIssue>>(&quality_issues_json)?,
        evaluation_results: from_json::<BTreeMap<String, Value>>(&evaluation_results_json)?,
        metadata: from_json::<BTreeMap<String, Value>>(&metadata_json)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Column list shared by every `SELECT` against `use_cases`, matching `UseCaseRowFields` order.
const USE_CASE_COLUMNS: &str = "id, name, team_email, state, config_file_key, dataset_file_key, \
     quality_issues_json, evaluation_results_json, metadata_json, created_at, updated_at";

impl UseCaseRepository for SqliteStore {
    fn create(&self, use_case: &UseCase) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        conn.execute(
            "INSERT INTO use_cases (
                id, name, team_email, state, config_file_key, dataset_file_key,
                quality_issues_json, evaluation_results_json, metadata_json,
                created_at, updated_at, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
            params![
                use_case.id.as_str(),
                use_case.name,
                use_case.team_email,
                state_to_str(&use_case.state)?,
                use_case.config_file_key,
                use_case.dataset_file_key,
                to_json(&use_case.quality_issues)?,
                to_json(&use_case.evaluation_results)?,
                to_json(&use_case.metadata)?,
                format_ts(use_case.created_at)?,
                format_ts(use_case.updated_at)?,
            ],
        )?;
        conn.execute(
            "INSERT INTO use_case_state_history (use_case_id, from_state, to_state, triggered_by, \
             trigger_reason, forced, additional_data_json, timestamp)
             VALUES (?1, NULL, ?2, 'system', NULL, 0, NULL, ?3)",
            params![
                use_case.id.as_str(),
                state_to_str(&use_case.state)?,
                format_ts(use_case.created_at)?,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &UseCaseId) -> Result<UseCase, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let row = conn.query_row_opt(
            &format!("SELECT {USE_CASE_COLUMNS} FROM use_cases WHERE id = ?1"),
            params![id.as_str()],
            map_use_case_row,
        )?;
        let Some(fields) = row else {
            return Err(EngineError::NotFound(format!("use case {id}")));
        };
        Ok(build_use_case(fields)?)
    }

    fn list(
        &self,
        state: Option<UseCaseState>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UseCase>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = if let Some(state) = state {
            conn.query_rows(
                &format!(
                    "SELECT {USE_CASE_COLUMNS} FROM use_cases WHERE state = ?1 \
                     ORDER BY created_at ASC LIMIT ?2 OFFSET ?3"
                ),
                params![state_to_str(&state)?, limit, offset],
                map_use_case_row,
            )?
        } else {
            conn.query_rows(
                &format!(
                    "SELECT {USE_CASE_COLUMNS} FROM use_cases ORDER BY created_at ASC LIMIT ?1 \
                     OFFSET ?2"
                ),
                params![limit, offset],
                map_use_case_row,
            )?
        };
        rows.into_iter().map(|fields| Ok(build_use_case(fields)?)).collect()
    }

    fn find_by_team_email(&self, team_email: &str) -> Result<Vec<UseCase>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let rows = conn.query_rows(
            &format!(
                "SELECT {USE_CASE_COLUMNS} FROM use_cases WHERE team_email = ?1 \
                 ORDER BY created_at ASC"
            ),
            params![team_email],
            map_use_case_row,
        )?;
        rows.into_iter().map(|fields| Ok(build_use_case(fields)?)).collect()
    }

    fn search_by_name(&self, needle: &str) -> Result<Vec<UseCase>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let pattern = format!("%{}%", needle.to_lowercase());
        let rows = conn.query_rows(
            &format!(
                "SELECT {USE_CASE_COLUMNS} FROM use_cases WHERE LOWER(name) LIKE ?1 \
                 ORDER BY created_at ASC"
            ),
            params![pattern],
            map_use_case_row,
        )?;
        rows.into_iter().map(|fields| Ok(build_use_case(fields)?)).collect()
    }

    fn update(&self, use_case: &UseCase) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let changed = conn.execute(
            "UPDATE use_cases SET name = ?1, team_email = ?2, state = ?3, config_file_key = ?4, \
             dataset_file_key = ?5, quality_issues_json = ?6, evaluation_results_json = ?7, \
             metadata_json = ?8, updated_at = ?9, version = version + 1
             WHERE id = ?10 AND updated_at = ?11",
            params![
                use_case.name,
                use_case.team_email,
                state_to_str(&use_case.state)?,
                use_case.config_file_key,
                use_case.dataset_file_key,
                to_json(&use_case.quality_issues)?,
                to_json(&use_case.evaluation_results)?,
                to_json(&use_case.metadata)?,
                format_ts(now())?,
                use_case.id.as_str(),
                format_ts(use_case.updated_at)?,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::StaleWrite(format!("use case {}", use_case.id)));
        }
        Ok(())
    }

    fn delete(&self, id: &UseCaseId) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        conn.execute("DELETE FROM use_cases WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    fn load_state_machine(&self, id: &UseCaseId) -> Result<StateMachine<UseCaseState>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let current = conn.query_row_opt(
            "SELECT state FROM use_cases WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let Some(current) = current else {
            return Err(EngineError::NotFound(format!("use case {id}")));
        };
        let current: UseCaseState = str_to_state(&current)?;
        let history = load_history(&conn, "use_case_state_history", "use_case_id", id.as_str())?;
        Ok(state_machine_from_parts(current, history)?)
    }

    fn save_state_machine(
        &self,
        id: &UseCaseId,
        sm: &StateMachine<UseCaseState>,
    ) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let Some(tail) = sm.history().last() else {
            return Err(EngineError::Corruption("state machine has no history".to_owned()));
        };
        let existing_len =
            save_new_history(&conn, "use_case_state_history", "use_case_id", id.as_str(), sm.history())?;
        let expected_prior = expected_prior_updated_at(sm.history(), existing_len);
        let changed = conn.execute(
            "UPDATE use_cases SET state = ?1, updated_at = ?2, version = version + 1
             WHERE id = ?3 AND updated_at = ?4",
            params![
                state_to_str(&tail.to)?,
                format_ts(tail.at)?,
                id.as_str(),
                format_ts(expected_prior)?,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::StaleWrite(format!("use case {id}")));
        }
        Ok(())
    }

    fn state_summary(&self) -> Result<BTreeMap<UseCaseState, usize>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let rows = conn.query_rows(
            "SELECT state, COUNT(*) FROM use_cases GROUP BY state",
            params![],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut summary = BTreeMap::new();
        for (state, count) in rows {
            summary.insert(str_to_state::<UseCaseState>(&state)?, usize::try_from(count).unwrap_or(0));
        }
        Ok(summary)
    }

    fn log_activity(&self, entry: &ActivityLog) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        conn.execute(
            "INSERT INTO activity_log (use_case_id, activity_type, description, metadata_json, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.use_case_id.as_str(),
                entry.activity_type,
                entry.description,
                to_json(&entry.metadata)?,
                format_ts(entry.created_at)?,
            ],
        )?;
        Ok(())
    }
}

/// Loads ordered history rows shared by both the use-case and model
/// history tables, which differ only in their owning-column name.
fn load_history<S: DeserializeOwned>(
    conn: &Conn<'_>,
    table: &str,
    owner_column: &str,
    owner_id: &str,
) -> Result<Vec<HistoryEntry<S>>, SqliteStoreError> {
    let rows = conn.query_rows(
        &format!(
            "SELECT to_state, timestamp, triggered_by, trigger_reason, forced FROM {table} \
             WHERE {owner_column} = ?1 ORDER BY timestamp ASC, id ASC"
        ),
        params![owner_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        },
    )?;
    rows.into_iter()
        .map(|(to_state, timestamp, triggered_by, reason, forced)| {
            Ok(HistoryEntry {
                to: str_to_state(&to_state)?,
                at: parse_ts(&timestamp)?,
                triggered_by,
                reason,
                forced: forced != 0,
            })
        })
        .collect()
}

/// Appends history entries beyond what is already persisted, shared by
/// both aggregate kinds. Returns the number of rows that were already
/// persisted before this call, so the caller can locate the history
/// entry whose timestamp the owning row's `updated_at` currently holds.
fn save_new_history<S: Serialize + Copy>(
    conn: &Conn<'_>,
    table: &str,
    owner_column: &str,
    owner_id: &str,
    history: &[HistoryEntry<S>],
) -> Result<usize, SqliteStoreError> {
    let existing_len: i64 = conn.query_row_one(
        &format!("SELECT COUNT(*) FROM {table} WHERE {owner_column} = ?1"),
        params![owner_id],
        |row| row.get(0),
    )?;
    let existing_len = usize::try_from(existing_len).unwrap_or(0);
    if history.len() <= existing_len {
        return Ok(existing_len);
    }
    for entry in &history[existing_len..] {
        conn.execute(
            &format!(
                "INSERT INTO {table} ({owner_column}, from_state, to_state, triggered_by, \
                 trigger_reason, forced, additional_data_json, timestamp)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, NULL, ?6)"
            ),
            params![
                owner_id,
                state_to_str(&entry.to)?,
                entry.triggered_by,
                entry.reason,
                i64::from(entry.forced),
                format_ts(entry.at)?,
            ],
        )?;
    }
    Ok(existing_len)
}

/// Finds the timestamp a row's `updated_at` column should currently hold,
/// given the in-memory history and how many of its entries were already
/// persisted before this call. This is the compare-and-set guard value
/// for a state machine's own `UPDATE`, distinct from the aggregate's
/// `update()` guard: the two writes protect the same row against two
/// different races.
fn expected_prior_updated_at<S: Copy>(history: &[HistoryEntry<S>], existing_len: usize) -> OffsetDateTime {
    existing_len
        .checked_sub(1)
        .and_then(|index| history.get(index))
        .map_or_else(|| history.last().map_or_else(now, |entry| entry.at), |entry| entry.at)
}

// ============================================================================
// SECTION: ModelRepository
// ============================================================================

/// Raw column tuple for one row of the `model_evaluations` table, in `MODEL_COLUMNS` order.
type ModelRowFields = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
);

/// Maps one `model_evaluations` row into its raw column tuple.
fn map_model_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelRowFields> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?,
    ))
}

/// Decodes a raw column tuple into a domain [`ModelEvaluation`].
fn build_model(fields: ModelRowFields) -> Result<ModelEvaluation, SqliteStoreError> {
    let (
        id, use_case_id, model_name, version, current_state, dataset_file_key,
        predictions_file_key, quality_issues_json, metadata_json, created_at, updated_at,
    ) = fields;
    Ok(ModelEvaluation {
        id: ModelId::from_raw(id),
        use_case_id: UseCaseId::from_raw(use_case_id),
        model_name,
        version,
        current_state: str_to_state::<ModelEvaluationState>(&current_state)?,
        dataset_file_key,
        predictions_file_key,
        quality_issues: from_json(&quality_issues_json)?,
        metadata: from_json(&metadata_json)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Column list shared by every `SELECT` against `model_evaluations`, matching `ModelRowFields` order.
const MODEL_COLUMNS: &str = "id, use_case_id, model_name, version, current_state, \
     dataset_file_key, predictions_file_key, quality_issues_json, metadata_json, created_at, \
     updated_at";

impl ModelRepository for SqliteStore {
    fn create(&self, model: &ModelEvaluation) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        conn.execute(
            "INSERT INTO model_evaluations (
                id, use_case_id, model_name, version, current_state, dataset_file_key,
                predictions_file_key, quality_issues_json, metadata_json, created_at, updated_at,
                row_version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
            params![
                model.id.as_str(),
                model.use_case_id.as_str(),
                model.model_name,
                model.version,
                state_to_str(&model.current_state)?,
                model.dataset_file_key,
                model.predictions_file_key,
                to_json(&model.quality_issues)?,
                to_json(&model.metadata)?,
                format_ts(model.created_at)?,
                format_ts(model.updated_at)?,
            ],
        )?;
        conn.execute(
            "INSERT INTO model_state_history (model_id, from_state, to_state, triggered_by, \
             trigger_reason, forced, file_uploaded, quality_issues_count, error_message, \
             additional_data_json, timestamp)
             VALUES (?1, NULL, ?2, 'system', NULL, 0, NULL, NULL, NULL, NULL, ?3)",
            params![
                model.id.as_str(),
                state_to_str(&model.current_state)?,
                format_ts(model.created_at)?,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &ModelId) -> Result<ModelEvaluation, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let row = conn.query_row_opt(
            &format!("SELECT {MODEL_COLUMNS} FROM model_evaluations WHERE id = ?1"),
            params![id.as_str()],
            map_model_row,
        )?;
        let Some(fields) = row else {
            return Err(EngineError::NotFound(format!("model evaluation {id}")));
        };
        Ok(build_model(fields)?)
    }

    fn list_for_use_case(&self, use_case_id: &UseCaseId) -> Result<Vec<ModelEvaluation>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let rows = conn.query_rows(
            &format!(
                "SELECT {MODEL_COLUMNS} FROM model_evaluations WHERE use_case_id = ?1 \
                 ORDER BY created_at ASC"
            ),
            params![use_case_id.as_str()],
            map_model_row,
        )?;
        rows.into_iter().map(|fields| Ok(build_model(fields)?)).collect()
    }

    fn find_by_state(
        &self,
        use_case_id: &UseCaseId,
        state: ModelEvaluationState,
    ) -> Result<Vec<ModelId>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let ids = conn.query_rows(
            "SELECT id FROM model_evaluations WHERE use_case_id = ?1 AND current_state = ?2",
            params![use_case_id.as_str(), state_to_str(&state)?],
            |row| row.get::<_, String>(0),
        )?;
        Ok(ids.into_iter().map(ModelId::from_raw).collect())
    }

    fn needing_action(
        &self,
        use_case_id: &UseCaseId,
    ) -> Result<BTreeMap<ModelEvaluationState, Vec<ModelId>>, EngineError> {
        let watched = [
            ModelEvaluationState::AwaitingDataFix,
            ModelEvaluationState::QualityCheckFailed,
            ModelEvaluationState::EvaluationFailed,
        ];
        let mut out = BTreeMap::new();
        for state in watched {
            let ids = self.find_by_state(use_case_id, state)?;
            if !ids.is_empty() {
                out.insert(state, ids);
            }
        }
        Ok(out)
    }

    fn update(&self, model: &ModelEvaluation) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let changed = conn.execute(
            "UPDATE model_evaluations SET model_name = ?1, version = ?2, current_state = ?3, \
             dataset_file_key = ?4, predictions_file_key = ?5, quality_issues_json = ?6, \
             metadata_json = ?7, updated_at = ?8, row_version = row_version + 1
             WHERE id = ?9 AND updated_at = ?10",
            params![
                model.model_name,
                model.version,
                state_to_str(&model.current_state)?,
                model.dataset_file_key,
                model.predictions_file_key,
                to_json(&model.quality_issues)?,
                to_json(&model.metadata)?,
                format_ts(now())?,
                model.id.as_str(),
                format_ts(model.updated_at)?,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::StaleWrite(format!("model evaluation {}", model.id)));
        }
        Ok(())
    }

    fn load_state_machine(
        &self,
        id: &ModelId,
    ) -> Result<StateMachine<ModelEvaluationState>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let current = conn.query_row_opt(
            "SELECT current_state FROM model_evaluations WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let Some(current) = current else {
            return Err(EngineError::NotFound(format!("model evaluation {id}")));
        };
        let current: ModelEvaluationState = str_to_state(&current)?;
        let history = load_history(&conn, "model_state_history", "model_id", id.as_str())?;
        Ok(state_machine_from_parts(current, history)?)
    }

    fn save_state_machine(
        &self,
        id: &ModelId,
        sm: &StateMachine<ModelEvaluationState>,
    ) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let Some(tail) = sm.history().last() else {
            return Err(EngineError::Corruption("state machine has no history".to_owned()));
        };
        let existing_len =
            save_new_history(&conn, "model_state_history", "model_id", id.as_str(), sm.history())?;
        let expected_prior = expected_prior_updated_at(sm.history(), existing_len);
        let changed = conn.execute(
            "UPDATE model_evaluations SET current_state = ?1, updated_at = ?2, \
             row_version = row_version + 1 WHERE id = ?3 AND updated_at = ?4",
            params![
                state_to_str(&tail.to)?,
                format_ts(tail.at)?,
                id.as_str(),
                format_ts(expected_prior)?,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::StaleWrite(format!("model evaluation {id}")));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: TaskQueue
// ============================================================================

/// Raw column tuple for one row of the `tasks` table, in `TASK_COLUMNS` order.
type TaskRowFields = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Maps one `tasks` row into its raw column tuple.
fn map_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRowFields> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?,
    ))
}

/// Decodes a raw column tuple into a domain [`Task`].
fn build_task(fields: TaskRowFields) -> Result<Task, SqliteStoreError> {
    let (
        id, task_name, args_json, status, priority, retry_count, max_retries, created_at,
        started_at, completed_at, error_message,
    ) = fields;
    Ok(Task {
        id: TaskId::from_raw(id),
        task_name,
        args: from_json(&args_json)?,
        status: str_to_state::<TaskStatus>(&status)?,
        priority,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        max_retries: u32::try_from(max_retries).unwrap_or(0),
        created_at: parse_ts(&created_at)?,
        started_at: started_at.as_deref().map(parse_ts).transpose()?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
        error_message,
    })
}

/// Column list shared by every `SELECT` against `tasks`, matching `TaskRowFields` order.
const TASK_COLUMNS: &str = "id, task_name, args_json, status, priority, retry_count, \
     max_retries, created_at, started_at, completed_at, error_message";

impl TaskQueue for SqliteStore {
    fn enqueue(
        &self,
        task_name: &str,
        args: Value,
        priority: i64,
        max_retries: u32,
    ) -> Result<TaskId, EngineError> {
        if !REGISTERED_TASK_NAMES.contains(&task_name) {
            return Err(EngineError::UnknownTask(task_name.to_owned()));
        }
        let id = TaskId::new();
        let locked = self.guard()?;
        let conn = Conn(&locked);
        conn.execute(
            "INSERT INTO tasks (
                id, task_name, args_json, status, priority, retry_count, max_retries, created_at
             ) VALUES (?1, ?2, ?3, 'PENDING', ?4, 0, ?5, ?6)",
            params![
                id.as_str(),
                task_name,
                to_json(&args)?,
                priority,
                i64::from(max_retries),
                format_ts(now())?,
            ],
        )?;
        Ok(id)
    }

    fn pick_next(&self) -> Result<Option<Task>, EngineError> {
        let mut locked = self.guard()?;
        let tx = locked.transaction().map_err(SqliteStoreError::from)?;
        let claimed: Option<String> = {
            use rusqlite::OptionalExtension;
            tx.query_row(
                "SELECT id FROM tasks WHERE status IN ('PENDING', 'RETRYING')
                 ORDER BY priority DESC, created_at ASC LIMIT 1",
                params![],
                |row| row.get(0),
            )
            .optional()
            .map_err(SqliteStoreError::from)?
        };
        let Some(id) = claimed else {
            tx.commit().map_err(SqliteStoreError::from)?;
            return Ok(None);
        };
        tx.execute(
            "UPDATE tasks SET status = 'RUNNING', started_at = ?1 WHERE id = ?2",
            params![format_ts(now())?, id],
        )
        .map_err(SqliteStoreError::from)?;
        let fields = tx
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                map_task_row,
            )
            .map_err(SqliteStoreError::from)?;
        tx.commit().map_err(SqliteStoreError::from)?;
        Ok(Some(build_task(fields)?))
    }

    fn mark_completed(&self, id: &TaskId) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let changed = conn.execute(
            "UPDATE tasks SET status = 'COMPLETED', completed_at = ?1 WHERE id = ?2",
            params![format_ts(now())?, id.as_str()],
        )?;
        if changed == 0 {
            return Err(EngineError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    fn mark_failed(&self, id: &TaskId, error_message: &str) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let row = conn.query_row_opt(
            "SELECT retry_count, max_retries FROM tasks WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let Some((retry_count, max_retries)) = row else {
            return Err(EngineError::NotFound(format!("task {id}")));
        };
        if retry_count < max_retries {
            conn.execute(
                "UPDATE tasks SET status = 'RETRYING', retry_count = retry_count + 1, \
                 error_message = ?1 WHERE id = ?2",
                params![error_message, id.as_str()],
            )?;
        } else {
            conn.execute(
                "UPDATE tasks SET status = 'FAILED', completed_at = ?1, error_message = ?2 \
                 WHERE id = ?3",
                params![format_ts(now())?, error_message, id.as_str()],
            )?;
        }
        Ok(())
    }

    fn get_status(&self, id: &TaskId) -> Result<TaskStatus, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let status = conn.query_row_opt(
            "SELECT status FROM tasks WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, String>(0),
        )?;
        let Some(status) = status else {
            return Err(EngineError::NotFound(format!("task {id}")));
        };
        Ok(str_to_state(&status)?)
    }

    fn request_cancellation(&self, id: &TaskId) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let changed = conn.execute(
            "UPDATE tasks SET status = 'CANCELLED_REQUESTED'
             WHERE id = ?1 AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')",
            params![id.as_str()],
        )?;
        if changed == 0 {
            return Err(EngineError::Validation(format!("task {id} is already terminal or missing")));
        }
        Ok(())
    }

    fn mark_cancelled(&self, id: &TaskId) -> Result<(), EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let existed = conn.query_row_opt(
            "SELECT 1 FROM tasks WHERE id = ?1",
            params![id.as_str()],
            |row| row.get::<_, i64>(0),
        )?;
        if existed.is_none() {
            return Err(EngineError::NotFound(format!("task {id}")));
        }
        conn.execute(
            "UPDATE tasks SET status = 'CANCELLED', completed_at = ?1
             WHERE id = ?2 AND status = 'CANCELLED_REQUESTED'",
            params![format_ts(now())?, id.as_str()],
        )?;
        Ok(())
    }

    fn queue_stats(&self) -> Result<BTreeMap<TaskStatus, usize>, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let rows = conn.query_rows(
            "SELECT status, COUNT(*) FROM tasks GROUP BY status",
            params![],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut stats = BTreeMap::new();
        for (status, count) in rows {
            stats.insert(str_to_state::<TaskStatus>(&status)?, usize::try_from(count).unwrap_or(0));
        }
        Ok(stats)
    }

    fn cleanup(&self, older_than_days: u32) -> Result<usize, EngineError> {
        let locked = self.guard()?;
        let conn = Conn(&locked);
        let cutoff = now() - time::Duration::days(i64::from(older_than_days));
        let removed = conn.execute(
            "DELETE FROM tasks WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')
             AND COALESCE(completed_at, created_at) < ?1",
            params![format_ts(cutoff)?],
        )?;
        Ok(removed)
    }
}

/// Reconciles tasks for aggregates that reached a non-terminal state
/// implying follow-up work but whose enqueue did not survive a crash.
///
/// Scans for use cases in `CONFIG_VALIDATION_RUNNING`/`EVALUATION_QUEUED`
/// and models in `QUALITY_CHECK_PENDING`/`EVALUATION_QUEUED` with no
/// pending or running task of the matching handler name already queued,
/// re-enqueueing one for each.
///
/// # Errors
///
/// Returns [`EngineError::Transient`] on a retryable storage failure.
pub fn reconcile_pending_work(store: &SqliteStore) -> Result<usize, EngineError> {
    let mut reenqueued = 0;
    let use_cases = UseCaseRepository::list(store, None, usize::MAX, 0)?;
    for use_case in use_cases {
        if let Some(task_name) = use_case_follow_up_task(use_case.state) {
            if !has_pending_task_for(store, task_name, use_case.id.as_str())? {
                TaskQueue::enqueue(
                    store,
                    task_name,
                    serde_json::json!({ "use_case_id": use_case.id.as_str() }),
                    10,
                    3,
                )?;
                reenqueued += 1;
            }
        }
        for model in ModelRepository::list_for_use_case(store, &use_case.id)? {
            if let Some(task_name) = model_follow_up_task(model.current_state) {
                if !has_pending_task_for(store, task_name, model.id.as_str())? {
                    TaskQueue::enqueue(
                        store,
                        task_name,
                        serde_json::json!({
                            "use_case_id": use_case.id.as_str(),
                            "model_id": model.id.as_str(),
                        }),
                        10,
                        3,
                    )?;
                    reenqueued += 1;
                }
            }
        }
    }
    Ok(reenqueued)
}

/// Names the task handler a use case in the given state still needs dispatched, if any.
fn use_case_follow_up_task(state: UseCaseState) -> Option<&'static str> {
    match state {
        UseCaseState::ConfigValidationRunning => Some("validate_config"),
        UseCaseState::EvaluationQueued => Some("run_evaluation"),
        _ => None,
    }
}

/// Names the task handler a model evaluation in the given state still needs dispatched, if any.
fn model_follow_up_task(state: ModelEvaluationState) -> Option<&'static str> {
    match state {
        ModelEvaluationState::QualityCheckPending => Some("run_quality_check"),
        ModelEvaluationState::EvaluationQueued => Some("run_evaluation"),
        _ => None,
    }
}

/// Checks whether a non-terminal task already references the given aggregate id.
fn has_pending_task_for(
    store: &SqliteStore,
    task_name: &str,
    aggregate_id: &str,
) -> Result<bool, EngineError> {
    let locked = store.guard()?;
    let conn = Conn(&locked);
    let count: i64 = conn.query_row_one(
        "SELECT COUNT(*) FROM tasks WHERE task_name = ?1 AND status IN ('PENDING', 'RUNNING', \
         'RETRYING') AND args_json LIKE ?2",
        params![task_name, format!("%{aggregate_id}%")],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use evalctl_core::{EngineError, TaskQueue, TaskStatus, UseCaseId, UseCaseRepository};

    use super::SqliteStore;

    #[test]
    fn enqueue_then_pick_next_claims_the_task() -> Result<(), EngineError> {
        let store = SqliteStore::open_in_memory()?;
        let id = store.enqueue("validate_config", serde_json::json!({}), 10, 3)?;
        let picked = store
            .pick_next()?
            .ok_or_else(|| EngineError::NotFound("expected a dispatchable task".to_owned()))?;
        assert_eq!(picked.id, id);
        assert_eq!(store.get_status(&id)?, TaskStatus::Running);
        Ok(())
    }

    #[test]
    fn get_on_missing_use_case_returns_not_found() -> Result<(), EngineError> {
        let store = SqliteStore::open_in_memory()?;
        let missing = UseCaseId::new();
        let result = UseCaseRepository::get(&store, &missing);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn enqueue_rejects_an_unregistered_task_name() -> Result<(), EngineError> {
        let store = SqliteStore::open_in_memory()?;
        let result = store.enqueue("delete_the_database", serde_json::json!({}), 0, 0);
        assert!(matches!(result, Err(EngineError::UnknownTask(_))));
        Ok(())
    }
}
