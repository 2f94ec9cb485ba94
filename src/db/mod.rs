//! Logical database connections and the query/cursor engine.
//!
//! A [`Database`] owns exactly one physical SQLite handle. All calls into the
//! engine are synchronous and only ever made by the worker currently affined to
//! the database, so the connection mutex is uncontended in practice.

mod cursor;
mod registry;
mod rows;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use thiserror::Error;

use crate::command::SqlCommand;
use crate::config::LogLevel;

pub use cursor::{Cursor, CursorArena, CursorId};
pub use registry::{DatabaseRegistry, OpenConfig, Registration};
pub use rows::{QueryOutput, QueryResult};

use rows::row_values;

pub type DatabaseId = i64;

/// Path sentinel for a private in-memory database.
pub const MEMORY_DATABASE_PATH: &str = ":memory:";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("open failed {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("database {0} is closed")]
    Closed(DatabaseId),
    #[error("bad parameter: {0}")]
    BadParam(String),
    #[error("cursor {0} not found")]
    CursorNotFound(CursorId),
}

/// Transaction marker carried by an `execute` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionChange {
    Enter,
    Leave,
    Unchanged,
}

impl From<Option<bool>> for TransactionChange {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Enter,
            Some(false) => Self::Leave,
            None => Self::Unchanged,
        }
    }
}

pub fn is_in_memory_path(path: Option<&str>) -> bool {
    path.map_or(true, |path| path == MEMORY_DATABASE_PATH)
}

pub struct Database {
    id: DatabaseId,
    path: String,
    single_instance: bool,
    read_only: bool,
    log_level: LogLevel,
    opened_at: String,
    in_transaction: AtomicBool,
    conn: Mutex<Option<Connection>>,
    cursors: Mutex<CursorArena>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("single_instance", &self.single_instance)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Database {
    pub fn new(id: DatabaseId, open_config: &OpenConfig) -> Self {
        Self {
            id,
            path: open_config
                .path
                .clone()
                .unwrap_or_else(|| MEMORY_DATABASE_PATH.to_string()),
            single_instance: open_config.single_instance,
            read_only: open_config.read_only,
            log_level: open_config.log_level,
            opened_at: Utc::now().to_rfc3339(),
            in_transaction: AtomicBool::new(false),
            conn: Mutex::new(None),
            cursors: Mutex::new(CursorArena::default()),
        }
    }

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_in_memory(&self) -> bool {
        is_in_memory_path(Some(&self.path))
    }

    pub fn single_instance(&self) -> bool {
        self.single_instance
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn opened_at(&self) -> &str {
        &self.opened_at
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.conn_guard().is_some()
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors_guard().len()
    }

    // A task that panicked while holding a lock must not wedge every later
    // task for this database.
    fn conn_guard(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cursors_guard(&self) -> MutexGuard<'_, CursorArena> {
        self.cursors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let guard = self.conn_guard();
        let conn = guard.as_ref().ok_or(DbError::Closed(self.id))?;
        f(conn)
    }

    /// Acquire the physical handle.
    pub fn open(&self, write_ahead_logging: bool) -> Result<(), DbError> {
        let conn = if self.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            let path = Path::new(&self.path);
            ensure_parent_dir(path)?;
            let flags = if self.read_only {
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
            } else {
                OpenFlags::default()
            };
            Connection::open_with_flags(path, flags)?
        };

        if write_ahead_logging && !self.read_only && !self.is_in_memory() {
            match conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0)) {
                Ok(mode) => tracing::trace!(db = self.id, "journal mode {mode}"),
                Err(e) => tracing::error!(db = self.id, "enable WAL error: {e}"),
            }
        }

        *self.conn_guard() = Some(conn);
        if self.log_level.has_sql() {
            tracing::debug!(db = self.id, worker = %thread_tag(), "opened {}", self.path);
        }
        Ok(())
    }

    /// Release the physical handle. Open cursors are invalidated.
    pub fn close(&self) -> Result<(), DbError> {
        let conn = self.conn_guard().take();
        let dropped = self.cursors_guard().clear();
        self.in_transaction.store(false, Ordering::Release);
        if dropped > 0 && self.log_level.has_verbose() {
            tracing::trace!(db = self.id, "closing with {dropped} open cursor(s)");
        }
        if let Some(conn) = conn {
            if self.log_level.has_sql() {
                tracing::debug!(db = self.id, worker = %thread_tag(), "closing {}", self.path);
            }
            conn.close().map_err(|(_, e)| DbError::Sqlite(e))?;
        }
        Ok(())
    }

    /// Run a statement that returns nothing.
    pub fn execute(&self, command: &SqlCommand, change: TransactionChange) -> Result<(), DbError> {
        let outcome = self.with_conn(|conn| {
            self.log_command(command);
            run_statement(conn, command)
        });
        match change {
            TransactionChange::Enter if outcome.is_ok() => {
                self.in_transaction.store(true, Ordering::Release);
            }
            // A failed COMMIT/ROLLBACK leaves nothing the caller can continue.
            TransactionChange::Leave => self.in_transaction.store(false, Ordering::Release),
            _ => {}
        }
        outcome
    }

    /// Run an insert and report the new row id, or `None` when nothing changed.
    pub fn insert(&self, command: &SqlCommand, no_result: bool) -> Result<Option<i64>, DbError> {
        self.with_conn(|conn| {
            self.log_command(command);
            run_statement(conn, command)?;
            if no_result {
                return Ok(None);
            }

            let (changes, id) = conn.query_row("SELECT changes(), last_insert_rowid()", [], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            if changes == 0 {
                if self.log_level.has_sql() {
                    tracing::debug!(db = self.id, "no changes (id was {id})");
                }
                return Ok(None);
            }
            if self.log_level.has_sql() {
                tracing::debug!(db = self.id, "inserted {id}");
            }
            Ok(Some(id))
        })
    }

    /// Run an update/delete and report the changed row count.
    pub fn update(&self, command: &SqlCommand, no_result: bool) -> Result<Option<i64>, DbError> {
        self.with_conn(|conn| {
            self.log_command(command);
            run_statement(conn, command)?;
            if no_result {
                return Ok(None);
            }

            match conn.query_row("SELECT changes()", [], |row| row.get::<_, i64>(0)) {
                Ok(changed) => {
                    if self.log_level.has_sql() {
                        tracing::debug!(db = self.id, "changed {changed}");
                    }
                    Ok(Some(changed))
                }
                Err(e) => {
                    tracing::error!(db = self.id, "fail to read changes for update/delete: {e}");
                    Ok(None)
                }
            }
        })
    }

    /// Run a read-only statement.
    ///
    /// Without `page_size` every row is materialized. With a page size, at
    /// most one page is returned and a cursor is registered when more rows
    /// remain.
    pub fn query(&self, command: &SqlCommand, page_size: Option<usize>) -> Result<QueryResult, DbError> {
        if page_size == Some(0) {
            return Err(DbError::BadParam("cursorPageSize must be positive".to_string()));
        }
        let sanitized = command.sanitize_for_query();
        self.with_conn(|conn| {
            self.log_command(&sanitized);
            let (mut result, more) = read_page(conn, &sanitized, 0, page_size)?;
            if let (Some(page_size), true) = (page_size, more) {
                let delivered = result.rows.len();
                let id = self.cursors_guard().register(sanitized, page_size, delivered);
                if self.log_level.has_verbose() {
                    tracing::trace!(db = self.id, cursor = id, "cursor registered after {delivered} row(s)");
                }
                result.cursor_id = Some(id);
            }
            Ok(result)
        })
    }

    /// Resume or cancel a cursor registered by [`Database::query`].
    ///
    /// Returns `None` when cancelled. The returned page carries the cursor id
    /// only while more rows remain; an exhausted cursor is released.
    pub fn query_cursor_next(&self, cursor_id: CursorId, cancel: bool) -> Result<Option<QueryResult>, DbError> {
        if cancel {
            let released = self.cursors_guard().release(cursor_id);
            if self.log_level.has_verbose() {
                tracing::trace!(db = self.id, cursor = cursor_id, found = released.is_some(), "cursor cancelled");
            }
            return Ok(None);
        }

        let cursor = self
            .cursors_guard()
            .get(cursor_id)
            .cloned()
            .ok_or(DbError::CursorNotFound(cursor_id))?;

        let outcome = self.with_conn(|conn| {
            read_page(conn, &cursor.command, cursor.position, Some(cursor.page_size))
        });

        let mut cursors = self.cursors_guard();
        match outcome {
            Ok((mut result, true)) => {
                cursors.advance(cursor_id, result.rows.len());
                result.cursor_id = Some(cursor_id);
                Ok(Some(result))
            }
            Ok((result, false)) => {
                cursors.release(cursor_id);
                if self.log_level.has_verbose() {
                    tracing::trace!(db = self.id, cursor = cursor_id, "cursor exhausted");
                }
                Ok(Some(result))
            }
            Err(e) => {
                cursors.release(cursor_id);
                Err(e)
            }
        }
    }

    fn log_command(&self, command: &SqlCommand) {
        if self.log_level.has_sql() {
            tracing::debug!(db = self.id, worker = %thread_tag(), "{command}");
        }
    }
}

/// Remove a database file and its journal companions.
pub fn delete_database_files(path: &str) -> std::io::Result<()> {
    if is_in_memory_path(Some(path)) {
        return Ok(());
    }
    for suffix in ["", "-journal", "-wal", "-shm"] {
        let candidate = format!("{path}{suffix}");
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<(), DbError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|e| DbError::OpenFailed {
        path: path.display().to_string(),
        reason: format!("failed to create directory {}: {e}", parent.display()),
    })
}

fn run_statement(conn: &Connection, command: &SqlCommand) -> Result<(), DbError> {
    if command.arguments().is_empty() {
        conn.execute_batch(command.sql())?;
        return Ok(());
    }
    let arguments = command.bind_arguments()?;
    let mut stmt = conn.prepare(command.sql())?;
    let mut rows = stmt.query(params_from_iter(arguments.iter()))?;
    while rows.next()?.is_some() {}
    Ok(())
}

/// Step `command`, skipping `skip` rows, collecting up to `limit` rows.
///
/// The flag is true when at least one more row exists past the page.
fn read_page(
    conn: &Connection,
    command: &SqlCommand,
    skip: usize,
    limit: Option<usize>,
) -> Result<(QueryResult, bool), DbError> {
    let arguments = command.query_arguments();
    let mut stmt = conn.prepare_cached(command.sql())?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let column_count = columns.len();
    let mut result = QueryResult::new(columns);

    let mut stepped = stmt.query(params_from_iter(arguments.iter()))?;
    for _ in 0..skip {
        if stepped.next()?.is_none() {
            return Ok((result, false));
        }
    }
    while let Some(row) = stepped.next()? {
        if limit.is_some_and(|limit| result.rows.len() >= limit) {
            return Ok((result, true));
        }
        result.rows.push(row_values(row, column_count)?);
    }
    Ok((result, false))
}

pub(crate) fn thread_tag() -> String {
    let thread = std::thread::current();
    format!("{}({:?})", thread.name().unwrap_or("unnamed"), thread.id())
}
