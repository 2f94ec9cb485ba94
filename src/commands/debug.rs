//! options / getDatabasesPath / debug

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::LogLevel;
use crate::db::Database;
use crate::error::ErrorPayload;
use crate::pool::PoolSnapshot;
use crate::{BridgeState, Reply};

use super::{parse_params, to_json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsParams {
    query_as_map_list: Option<bool>,
    thread_priority: Option<i32>,
    thread_count: Option<usize>,
    log_level: Option<LogLevel>,
}

#[derive(Debug, Deserialize)]
struct DebugParams {
    cmd: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseInfo {
    path: String,
    single_instance: bool,
    read_only: bool,
    in_transaction: bool,
    opened_at: String,
    cursors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<LogLevel>,
}

impl From<&Database> for DatabaseInfo {
    fn from(database: &Database) -> Self {
        Self {
            path: database.path().to_string(),
            single_instance: database.single_instance(),
            read_only: database.read_only(),
            in_transaction: database.in_transaction(),
            opened_at: database.opened_at().to_string(),
            cursors: database.cursor_count(),
            log_level: (database.log_level() != LogLevel::None).then_some(database.log_level()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    log_level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_priority: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    databases: Option<BTreeMap<String, DatabaseInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool: Option<PoolSnapshot>,
}

pub(super) fn options(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let params: OptionsParams = match parse_params("options", arguments) {
        Ok(params) => params,
        Err(e) => return reply.error(e),
    };
    if params.thread_count == Some(0) {
        return reply.error(ErrorPayload::bad_param("threadCount must be positive"));
    }

    let mut options = state.options_guard();
    if let Some(query_as_map_list) = params.query_as_map_list {
        options.query_as_map_list = query_as_map_list;
    }
    if let Some(priority) = params.thread_priority {
        // Recorded only; std threads expose no portable priority control.
        options.thread_priority = Some(priority);
    }
    if let Some(count) = params.thread_count {
        options.thread_count = count;
    }
    if let Some(level) = params.log_level {
        options.log_level = level;
    }
    tracing::debug!(options = ?*options, "options updated");
    drop(options);
    reply.success(serde_json::Value::Null);
}

pub(super) fn get_databases_path(state: &Arc<BridgeState>, reply: Reply) {
    let path = state.databases_path().display().to_string();
    reply.success(serde_json::Value::String(path));
}

pub(super) fn debug(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let params: DebugParams = match parse_params("debug", arguments) {
        Ok(params) => params,
        Err(e) => return reply.error(e),
    };
    if params.cmd != "get" {
        return reply.success(serde_json::Value::Object(serde_json::Map::new()));
    }

    let (log_level, thread_priority) = {
        let options = state.options_guard();
        (options.log_level, options.thread_priority)
    };
    let databases: BTreeMap<String, DatabaseInfo> = state
        .registry
        .databases()
        .iter()
        .map(|database| (database.id().to_string(), DatabaseInfo::from(database.as_ref())))
        .collect();
    let snapshot = DebugSnapshot {
        log_level: (log_level != LogLevel::None).then_some(log_level),
        thread_priority,
        databases: (!databases.is_empty()).then_some(databases),
        pool: state.scheduler.snapshot(),
    };
    reply.complete(to_json(&snapshot));
}
