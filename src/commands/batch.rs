//! batch: several statements against one database in a single task.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::SqlCommand;
use crate::db::{Database, DatabaseId, TransactionChange};
use crate::error::{classify, ErrorPayload};
use crate::value::Value;
use crate::{BridgeState, Reply};

use super::sql::shape;
use super::{resolve, to_json, TargetsDatabase};

/// One entry of a `batch` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperation {
    pub method: String,
    pub sql: String,
    pub arguments: Option<Vec<Value>>,
    pub in_transaction: Option<bool>,
}

impl BatchOperation {
    pub fn new(method: impl Into<String>, sql: impl Into<String>, arguments: Option<Vec<Value>>) -> Self {
        Self {
            method: method.into(),
            sql: sql.into(),
            arguments,
            in_transaction: None,
        }
    }

    fn command(&self) -> SqlCommand {
        SqlCommand::new(self.sql.clone(), self.arguments.clone())
    }
}

/// Outcome of one operation, serialized as `{"result": ..}` or `{"error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEntry {
    Result(serde_json::Value),
    Error(ErrorPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchParams {
    id: DatabaseId,
    operations: Vec<BatchOperation>,
    no_result: Option<bool>,
    continue_on_error: Option<bool>,
}

impl TargetsDatabase for BatchParams {
    fn database_id(&self) -> DatabaseId {
        self.id
    }
}

/// Applies a list of operations in order against one database.
#[derive(Debug)]
pub struct BatchExecutor<'a> {
    database: &'a Database,
    no_result: bool,
    continue_on_error: bool,
    query_as_map_list: bool,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(database: &'a Database) -> Self {
        Self {
            database,
            no_result: false,
            continue_on_error: false,
            query_as_map_list: false,
        }
    }

    pub fn no_result(mut self, no_result: bool) -> Self {
        self.no_result = no_result;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn query_as_map_list(mut self, query_as_map_list: bool) -> Self {
        self.query_as_map_list = query_as_map_list;
        self
    }

    /// Run every operation. Returns `None` when results are suppressed.
    ///
    /// The first failure aborts the batch unless `continue_on_error` is set,
    /// in which case it is recorded in place of that operation's result. An
    /// unsupported method always aborts.
    pub fn run(&self, operations: &[BatchOperation]) -> Result<Option<Vec<BatchEntry>>, ErrorPayload> {
        let mut entries = Vec::with_capacity(operations.len());
        for operation in operations {
            match self.apply(operation)? {
                Ok(value) => entries.push(BatchEntry::Result(value)),
                Err(payload) if self.continue_on_error => {
                    if self.database.log_level().has_sql() {
                        tracing::debug!(db = self.database.id(), "batch entry failed: {payload}");
                    }
                    entries.push(BatchEntry::Error(payload));
                }
                Err(payload) => return Err(payload),
            }
        }
        Ok((!self.no_result).then_some(entries))
    }

    // Outer error aborts the batch, inner error is the operation's own failure.
    fn apply(&self, operation: &BatchOperation) -> Result<Result<serde_json::Value, ErrorPayload>, ErrorPayload> {
        let command = operation.command();
        let outcome = match operation.method.as_str() {
            "execute" => self
                .database
                .execute(&command, TransactionChange::from(operation.in_transaction))
                .map(|()| serde_json::Value::Null),
            "insert" => self
                .database
                .insert(&command, self.no_result)
                .map(|id| serde_json::json!(id)),
            "update" => self
                .database
                .update(&command, self.no_result)
                .map(|changed| serde_json::json!(changed)),
            "query" => match self.database.query(&command, None) {
                Ok(result) => return Ok(to_json(&shape(result, self.query_as_map_list))),
                Err(e) => Err(e),
            },
            other => {
                return Err(ErrorPayload::bad_param(format!("batch method {other} not supported")));
            }
        };
        Ok(outcome.map_err(|e| classify(&e, Some(&command))))
    }
}

pub(super) fn batch(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<BatchParams>(state, "batch", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let as_map_list = state.options_guard().query_as_map_list;

    state.post(Some(database.clone()), move || {
        let outcome = BatchExecutor::new(&database)
            .no_result(params.no_result.unwrap_or(false))
            .continue_on_error(params.continue_on_error.unwrap_or(false))
            .query_as_map_list(as_map_list)
            .run(&params.operations)
            .and_then(|entries| match entries {
                Some(entries) => to_json(&entries),
                None => Ok(serde_json::Value::Null),
            });
        reply.complete(outcome);
    });
}
