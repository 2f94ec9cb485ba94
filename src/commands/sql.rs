//! execute / insert / update / query / queryCursorNext

use std::sync::Arc;

use serde::Deserialize;

use crate::command::SqlCommand;
use crate::db::{CursorId, DatabaseId, QueryOutput, QueryResult, TransactionChange};
use crate::error::classify;
use crate::value::Value;
use crate::{BridgeState, Reply};

use super::{resolve, to_json, TargetsDatabase};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlParams {
    id: DatabaseId,
    sql: String,
    arguments: Option<Vec<Value>>,
    in_transaction: Option<bool>,
    no_result: Option<bool>,
    cursor_page_size: Option<usize>,
}

impl SqlParams {
    fn command(&self) -> SqlCommand {
        SqlCommand::new(self.sql.clone(), self.arguments.clone())
    }
}

impl TargetsDatabase for SqlParams {
    fn database_id(&self) -> DatabaseId {
        self.id
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorParams {
    id: DatabaseId,
    cursor_id: CursorId,
    cancel: Option<bool>,
}

impl TargetsDatabase for CursorParams {
    fn database_id(&self) -> DatabaseId {
        self.id
    }
}

pub(super) fn execute(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<SqlParams>(state, "execute", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let command = params.command();
    let change = TransactionChange::from(params.in_transaction);

    state.post(Some(database.clone()), move || {
        let outcome = database
            .execute(&command, change)
            .map(|()| serde_json::Value::Null)
            .map_err(|e| classify(&e, Some(&command)));
        reply.complete(outcome);
    });
}

pub(super) fn insert(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<SqlParams>(state, "insert", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let command = params.command();
    let no_result = params.no_result.unwrap_or(false);

    state.post(Some(database.clone()), move || {
        let outcome = database
            .insert(&command, no_result)
            .map(|id| serde_json::json!(id))
            .map_err(|e| classify(&e, Some(&command)));
        reply.complete(outcome);
    });
}

pub(super) fn update(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<SqlParams>(state, "update", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let command = params.command();
    let no_result = params.no_result.unwrap_or(false);

    state.post(Some(database.clone()), move || {
        let outcome = database
            .update(&command, no_result)
            .map(|changed| serde_json::json!(changed))
            .map_err(|e| classify(&e, Some(&command)));
        reply.complete(outcome);
    });
}

pub(super) fn query(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<SqlParams>(state, "query", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let command = params.command();
    let page_size = params.cursor_page_size;
    let as_map_list = state.options_guard().query_as_map_list;

    state.post(Some(database.clone()), move || {
        let outcome = database
            .query(&command, page_size)
            .map_err(|e| classify(&e, Some(&command)))
            .and_then(|result| to_json(&shape(result, as_map_list && page_size.is_none())));
        reply.complete(outcome);
    });
}

pub(super) fn query_cursor_next(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<CursorParams>(state, "queryCursorNext", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };
    let cancel = params.cancel.unwrap_or(false);

    state.post(Some(database.clone()), move || {
        let outcome = match database.query_cursor_next(params.cursor_id, cancel) {
            Ok(Some(page)) => to_json(&page),
            Ok(None) => Ok(serde_json::Value::Null),
            Err(e) => Err(classify(&e, None)),
        };
        reply.complete(outcome);
    });
}

pub(super) fn shape(result: QueryResult, as_map_list: bool) -> QueryOutput {
    if as_map_list {
        QueryOutput::MapList(result.into_map_list())
    } else {
        QueryOutput::Columns(result)
    }
}
