//! Native execution core for embedded SQLite access.
//!
//! A host process hands serialized requests (`openDatabase`, `execute`,
//! `query`, `batch`, ...) to a [`Bridge`]. Each request is routed to its
//! logical database, run on a worker thread and answered exactly once through
//! a [`Reply`].
//!
//! # Architecture
//!
//! - `commands`: request decoding and per-method handlers
//! - `pool`: worker threads with per-database ordering and affinity
//! - `scheduler`: lazy pool start and stop-on-empty
//! - `db`: logical databases, the registry and paged cursors
//! - `command`, `value`: SQL statements and the wire value model
//! - `error`: reported error taxonomy
//! - `config`: host configuration and runtime options

pub mod command;
mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod pool;
pub mod scheduler;
pub mod value;

#[cfg(test)]
mod testing;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use serde::Deserialize;
use tokio::sync::oneshot;

pub use command::SqlCommand;
pub use commands::{BatchEntry, BatchExecutor, BatchOperation};
pub use config::{BridgeConfig, LogLevel, Options};
pub use error::{ErrorKind, ErrorPayload};
pub use value::Value;

use db::{Database, DatabaseRegistry};
use scheduler::Scheduler;

// ---------------------------------------------------------------------------
// Requests and replies
// ---------------------------------------------------------------------------

/// One serialized operation from the host.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl Request {
    pub fn new(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

pub type Response = Result<serde_json::Value, ErrorPayload>;

type Callback = Box<dyn FnOnce(Response) + Send + 'static>;

/// Completion handle for one request.
///
/// Completed at most once. A reply dropped without being completed answers
/// with a `database_not_found` error, so a request whose task never ran is
/// still answered.
pub struct Reply {
    callback: Option<Callback>,
}

impl Reply {
    pub fn new(callback: impl FnOnce(Response) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// A reply that forwards its response into a oneshot receiver.
    pub fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let reply = Self::new(move |response| {
            let _ = tx.send(response);
        });
        (reply, rx)
    }

    pub fn complete(mut self, response: Response) {
        if let Some(callback) = self.callback.take() {
            callback(response);
        }
    }

    pub fn success(self, value: serde_json::Value) {
        self.complete(Ok(value));
    }

    pub fn error(self, payload: ErrorPayload) {
        self.complete(Err(payload));
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(closed_before_completion()));
        }
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

fn closed_before_completion() -> ErrorPayload {
    ErrorPayload::new(
        ErrorKind::DatabaseNotFound,
        "database closed before the request completed",
    )
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct BridgeState {
    pub config: BridgeConfig,
    pub options: Mutex<Options>,
    pub registry: DatabaseRegistry,
    pub scheduler: Scheduler,
    databases_path: OnceLock<PathBuf>,
}

impl BridgeState {
    fn new(config: BridgeConfig) -> Self {
        Self {
            options: Mutex::new(Options::from_config(&config)),
            registry: DatabaseRegistry::new(),
            scheduler: Scheduler::new(config.pool_name.clone()),
            databases_path: OnceLock::new(),
            config,
        }
    }

    pub fn options_guard(&self) -> MutexGuard<'_, Options> {
        self.options.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn options(&self) -> Options {
        self.options_guard().clone()
    }

    /// Post work for `database` on the worker pool, starting it if needed.
    pub fn post(&self, database: Option<Arc<Database>>, work: impl FnOnce() + Send + 'static) {
        let worker_count = self.options_guard().thread_count;
        self.scheduler.post(worker_count, database, Box::new(work));
    }

    pub fn databases_path(&self) -> &Path {
        self.databases_path.get_or_init(|| {
            self.config
                .databases_path
                .clone()
                .unwrap_or_else(config::default_databases_path)
        })
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Handle owned by the host. Cloning shares the same databases and pool.
#[derive(Clone)]
pub struct Bridge {
    state: Arc<BridgeState>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            state: Arc::new(BridgeState::new(config)),
        }
    }

    /// Build a bridge from `SQLBRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(BridgeConfig::from_env())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    /// Route `request` and answer it through `reply`.
    ///
    /// Requests that need the engine are answered from a worker thread;
    /// malformed requests and unknown databases are answered before this
    /// returns.
    pub fn handle(&self, request: Request, reply: Reply) {
        commands::dispatch(&self.state, request, reply);
    }

    /// Route `request` and wait for its response.
    pub async fn invoke(&self, request: Request) -> Response {
        let (reply, rx) = Reply::channel();
        self.handle(request, reply);
        rx.await.unwrap_or_else(|_| Err(closed_before_completion()))
    }

    /// Number of open logical databases.
    pub fn open_databases(&self) -> usize {
        self.state.registry.len()
    }

    /// Whether the worker pool is currently started.
    pub fn is_pool_running(&self) -> bool {
        self.state.scheduler.is_running()
    }

    /// Stop the worker pool. Waiting requests are answered with an error.
    pub fn shutdown(&self) {
        self.state.scheduler.shutdown();
    }
}

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `sqlbridge=debug,info`. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqlbridge=debug,info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
