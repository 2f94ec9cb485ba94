//! Error taxonomy reported back to callers.
//!
//! Every failure crossing the bridge is one of four kinds. Engine errors are
//! classified here, at the point of execution, so nothing escapes a worker
//! unclassified.

use rusqlite::ErrorCode;
use serde::Serialize;

use crate::command::SqlCommand;
use crate::db::DbError;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The underlying storage could not be opened.
    OpenFailed,
    /// Statement, constraint or type error raised by the engine.
    SqliteError,
    /// Malformed request.
    BadParam,
    /// The request references a closed or unknown database.
    DatabaseNotFound,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenFailed => "open_failed",
            Self::SqliteError => "sqlite_error",
            Self::BadParam => "bad_param",
            Self::DatabaseNotFound => "database_not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The statement and arguments that produced an engine error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub sql: String,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ErrorContext>,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn bad_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadParam, message)
    }

    pub fn database_not_found(id: i64) -> Self {
        Self::new(ErrorKind::DatabaseNotFound, format!("database_closed {id}"))
    }

    pub fn with_command(mut self, command: Option<&SqlCommand>) -> Self {
        self.context = command.map(|command| ErrorContext {
            sql: command.sql().to_string(),
            arguments: command.arguments().to_vec(),
        });
        self
    }
}

/// Map an execution failure onto the reported error taxonomy.
pub fn classify(error: &DbError, command: Option<&SqlCommand>) -> ErrorPayload {
    match error {
        DbError::OpenFailed { path, reason } => {
            ErrorPayload::new(ErrorKind::OpenFailed, format!("open_failed {path}: {reason}"))
        }
        DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::CannotOpen =>
        {
            ErrorPayload::new(ErrorKind::OpenFailed, format!("open_failed {error}"))
        }
        DbError::Sqlite(_) => {
            ErrorPayload::new(ErrorKind::SqliteError, error.to_string()).with_command(command)
        }
        DbError::Closed(id) => ErrorPayload::database_not_found(*id),
        DbError::BadParam(_) | DbError::CursorNotFound(_) => {
            ErrorPayload::bad_param(error.to_string())
        }
    }
}
