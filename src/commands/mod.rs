//! Request handlers, one per method.
//!
//! Handlers decode their arguments, resolve the target database and post the
//! engine call to the worker pool. Anything that fails before a task is
//! posted is answered right away.

mod batch;
mod database;
mod debug;
mod sql;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{Database, DatabaseId};
use crate::error::{ErrorKind, ErrorPayload};
use crate::{BridgeState, Reply, Request};

pub use batch::{BatchEntry, BatchExecutor, BatchOperation};

pub(crate) fn dispatch(state: &Arc<BridgeState>, request: Request, reply: Reply) {
    let Request { method, arguments } = request;
    match method.as_str() {
        "openDatabase" => database::open_database(state, arguments, reply),
        "closeDatabase" => database::close_database(state, arguments, reply),
        "deleteDatabase" => database::delete_database(state, arguments, reply),
        "execute" => sql::execute(state, arguments, reply),
        "insert" => sql::insert(state, arguments, reply),
        "update" => sql::update(state, arguments, reply),
        "query" => sql::query(state, arguments, reply),
        "queryCursorNext" => sql::query_cursor_next(state, arguments, reply),
        "batch" => batch::batch(state, arguments, reply),
        "options" => debug::options(state, arguments, reply),
        "getDatabasesPath" => debug::get_databases_path(state, reply),
        "debug" => debug::debug(state, arguments, reply),
        other => {
            tracing::warn!("unknown method {other}");
            reply.error(ErrorPayload::bad_param(format!("method {other} not implemented")));
        }
    }
}

/// Parameters addressed to one open database.
pub(crate) trait TargetsDatabase {
    fn database_id(&self) -> DatabaseId;
}

/// Decode `arguments` into `T`. A missing argument object counts as empty.
pub(crate) fn parse_params<T: DeserializeOwned>(method: &str, arguments: serde_json::Value) -> Result<T, ErrorPayload> {
    let arguments = if arguments.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| ErrorPayload::bad_param(format!("invalid arguments for {method}: {e}")))
}

/// Decode parameters and look up the database they target.
pub(crate) fn resolve<T>(
    state: &BridgeState,
    method: &str,
    arguments: serde_json::Value,
) -> Result<(T, Arc<Database>), ErrorPayload>
where
    T: DeserializeOwned + TargetsDatabase,
{
    let params: T = parse_params(method, arguments)?;
    let id = params.database_id();
    let database = state
        .registry
        .get(id)
        .ok_or_else(|| ErrorPayload::database_not_found(id))?;
    Ok((params, database))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, ErrorPayload> {
    serde_json::to_value(value)
        .map_err(|e| ErrorPayload::new(ErrorKind::SqliteError, format!("failed to encode result: {e}")))
}
