//! openDatabase / closeDatabase / deleteDatabase

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{self, DatabaseId, OpenConfig, Registration};
use crate::error::classify;
use crate::{BridgeState, Reply};

use super::{parse_params, resolve, to_json, TargetsDatabase};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenParams {
    path: Option<String>,
    read_only: Option<bool>,
    single_instance: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenResult {
    id: DatabaseId,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    recovered: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    recovered_in_transaction: bool,
}

#[derive(Debug, Deserialize)]
struct CloseParams {
    id: DatabaseId,
}

impl TargetsDatabase for CloseParams {
    fn database_id(&self) -> DatabaseId {
        self.id
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: String,
}

pub(super) fn open_database(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let params: OpenParams = match parse_params("openDatabase", arguments) {
        Ok(params) => params,
        Err(e) => return reply.error(e),
    };
    let log_level = state.options_guard().log_level;
    let open_config = OpenConfig::new(
        params.path,
        params.read_only.unwrap_or(false),
        params.single_instance,
        log_level,
    );

    let database = match state.registry.open_or_recover(&open_config) {
        Registration::Recovered(database) => {
            let result = OpenResult {
                id: database.id(),
                recovered: true,
                recovered_in_transaction: database.in_transaction(),
            };
            return reply.complete(to_json(&result));
        }
        Registration::Created(database) => database,
    };

    // The open is the first task for the new identity, so every later request
    // for it runs after the handle exists.
    let wal = state.config.write_ahead_logging;
    let task_state = state.clone();
    state.post(Some(database.clone()), move || match database.open(wal) {
        Ok(()) => {
            let result = OpenResult {
                id: database.id(),
                recovered: false,
                recovered_in_transaction: false,
            };
            reply.complete(to_json(&result));
        }
        Err(e) => {
            tracing::error!(db = database.id(), "open failed {}: {e}", database.path());
            task_state.registry.remove(database.id());
            reply.error(classify(&e, None));
            task_state.scheduler.stop_if_unused(&task_state.registry);
        }
    });
}

pub(super) fn close_database(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let (params, database) = match resolve::<CloseParams>(state, "closeDatabase", arguments) {
        Ok(resolved) => resolved,
        Err(e) => return reply.error(e),
    };

    // Forget the identity now so a re-open of the same path queued behind
    // this close gets a fresh database instead of the one being closed.
    state.registry.remove(params.id);

    let task_state = state.clone();
    state.post(Some(database.clone()), move || {
        if let Err(e) = database.close() {
            tracing::error!(db = params.id, "error closing {}: {e}", database.path());
        }
        reply.success(serde_json::Value::Null);
        task_state.scheduler.stop_if_unused(&task_state.registry);
    });
}

pub(super) fn delete_database(state: &Arc<BridgeState>, arguments: serde_json::Value, reply: Reply) {
    let params: DeleteParams = match parse_params("deleteDatabase", arguments) {
        Ok(params) => params,
        Err(e) => return reply.error(e),
    };
    let path = params.path;

    // An open single-instance database at this path is closed first, after
    // its pending tasks.
    let Some(database) = state.registry.take_single_instance(&path) else {
        delete_files(&path);
        return reply.success(serde_json::Value::Null);
    };

    if database.log_level().has_verbose() {
        tracing::trace!(db = database.id(), "closing open database before deleting {path}");
    }
    let task_state = state.clone();
    state.post(Some(database.clone()), move || {
        if let Err(e) = database.close() {
            tracing::error!(db = database.id(), "error closing {path} before delete: {e}");
        }
        delete_files(&path);
        reply.success(serde_json::Value::Null);
        task_state.scheduler.stop_if_unused(&task_state.registry);
    });
}

fn delete_files(path: &str) {
    if let Err(e) = db::delete_database_files(path) {
        tracing::error!("error deleting database {path}: {e}");
    }
}
