//! Owns the worker pool for a bridge: starts it on first use and stops it once
//! the last database is gone.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::{Database, DatabaseRegistry};
use crate::pool::{DatabaseWorkerPool, PoolSnapshot, Work};

pub struct Scheduler {
    name: String,
    pool: Mutex<Option<DatabaseWorkerPool>>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DatabaseWorkerPool>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Post `work`, starting a pool of `worker_count` workers if none runs.
    ///
    /// When the pool cannot be started the work is dropped, which completes
    /// its reply with an error.
    pub fn post(&self, worker_count: usize, database: Option<Arc<Database>>, work: Work) {
        let mut slot = self.lock();
        if slot.is_none() {
            match DatabaseWorkerPool::start(&self.name, worker_count) {
                Ok(pool) => *slot = Some(pool),
                Err(e) => {
                    tracing::error!(pool = %self.name, "failed to start worker pool: {e}");
                    return;
                }
            }
        }
        if let Some(pool) = slot.as_ref() {
            pool.post(database, work);
        }
    }

    /// Stop the pool when `registry` is empty and nothing else is queued or
    /// running. Called from the task that closed a database.
    pub fn stop_if_unused(&self, registry: &DatabaseRegistry) -> bool {
        let pool = {
            let mut slot = self.lock();
            let unused = registry.is_empty() && slot.as_ref().is_some_and(DatabaseWorkerPool::is_quiescent);
            if !unused {
                return false;
            }
            slot.take()
        };
        // Joining happens outside the lock; a worker may be waiting on it.
        if let Some(pool) = pool {
            tracing::debug!(pool = %self.name, "no open databases left, stopping pool");
            pool.quit();
        }
        true
    }

    pub fn shutdown(&self) {
        let pool = self.lock().take();
        if let Some(pool) = pool {
            pool.quit();
        }
    }

    pub fn snapshot(&self) -> Option<PoolSnapshot> {
        self.lock().as_ref().map(DatabaseWorkerPool::snapshot)
    }
}
