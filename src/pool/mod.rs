//! Worker pool that runs database tasks.
//!
//! Tasks for one database run in submission order and never overlap. Tasks for
//! different databases may run in parallel, up to the number of workers.
//!
//! Each worker is affined to the database it is serving while it has tasks in
//! flight. A database left mid-transaction stays pinned to the worker that ran
//! its last task until the transaction ends, because the engine scopes
//! transaction state to the connection and its thread.
//!
//! Lock order is pool state, then worker state. No lock is held while a task
//! runs.

mod task;
mod worker;


use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::db::{Database, DatabaseId};

pub use task::{Task, Work};
pub use worker::WorkerState;

use worker::DatabaseWorker;

/// Point-in-time view of the pool, used by the `debug` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub workers: usize,
    pub idle: usize,
    pub busy: usize,
    pub waiting: usize,
}

#[derive(Default)]
struct PoolState {
    waiting: VecDeque<Task>,
    idle: Vec<usize>,
    busy: Vec<usize>,
    next_seq: u64,
    quitting: bool,
}

pub(crate) struct PoolShared {
    name: String,
    workers: Vec<DatabaseWorker>,
    state: Mutex<PoolState>,
}

/// Fixed-size pool of database workers.
pub struct DatabaseWorkerPool {
    shared: Arc<PoolShared>,
}

impl DatabaseWorkerPool {
    /// Spawn `worker_count` threads named `<name>-<i>`.
    pub fn start(name: &str, worker_count: usize) -> std::io::Result<Self> {
        let worker_count = worker_count.max(1);
        let mut spawn_error = None;
        let shared = Arc::new_cyclic(|pool| {
            let mut workers = Vec::with_capacity(worker_count);
            for index in 0..worker_count {
                match DatabaseWorker::spawn(format!("{name}-{index}"), index, pool.clone()) {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
            let state = PoolState {
                idle: (0..workers.len()).collect(),
                ..PoolState::default()
            };
            PoolShared {
                name: name.to_string(),
                workers,
                state: Mutex::new(state),
            }
        });

        let pool = Self { shared };
        if let Some(e) = spawn_error {
            pool.quit();
            return Err(e);
        }
        tracing::debug!(pool = %pool.shared.name, workers = worker_count, "worker pool started");
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Submit `work` to run against `database`.
    pub fn post(&self, database: Option<Arc<Database>>, work: Work) {
        let mut state = self.shared.lock_state();
        let seq = state.next_seq;
        state.next_seq += 1;
        let task = Task::new(database, work, seq);

        if state.quitting {
            drop(state);
            tracing::warn!(db = task.database_id(), "pool is stopping; task dropped");
            return;
        }

        // A busy worker already serving this database takes the task directly,
        // unless earlier tasks are still waiting and would be overtaken.
        if state.waiting.is_empty() {
            for &index in &state.busy {
                let worker = &self.shared.workers[index];
                if !self.shared.pinned_to_other(index, &task) && worker.core.try_accept_affine(&task) {
                    tracing::trace!(worker = worker.core.name(), db = task.database_id(), task = seq, "handed to busy worker");
                    worker.dispatch(task);
                    return;
                }
            }
        }

        state.waiting.push_back(task);
        self.shared.fill_idle_workers(&mut state);
    }

    /// Stop every worker. Waiting tasks are dropped, tasks already handed to a
    /// worker still run. Joins every worker except the calling thread.
    pub fn quit(&self) {
        let (dropped, handles) = {
            let mut state = self.shared.lock_state();
            state.quitting = true;
            let dropped: Vec<Task> = state.waiting.drain(..).collect();
            let mut handles = Vec::with_capacity(self.shared.workers.len());
            for worker in &self.shared.workers {
                worker.close();
                if let Some(handle) = worker.take_handle() {
                    handles.push(handle);
                }
            }
            (dropped, handles)
        };

        if !dropped.is_empty() {
            tracing::warn!(pool = %self.shared.name, count = dropped.len(), "dropping waiting tasks");
        }
        drop(dropped);

        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(pool = %self.shared.name, "worker thread panicked");
            }
        }
        tracing::debug!(pool = %self.shared.name, "worker pool stopped");
    }

    /// True when nothing is waiting and no worker has tasks in flight, apart
    /// from the task running on the calling thread.
    pub fn is_quiescent(&self) -> bool {
        let state = self.shared.lock_state();
        if !state.waiting.is_empty() {
            return false;
        }
        let current = std::thread::current().id();
        self.shared.workers.iter().all(|worker| {
            let allowed = if worker.thread_id() == Some(current) { 1 } else { 0 };
            worker.core.in_flight() <= allowed
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.shared.lock_state();
        let busy = self
            .shared
            .workers
            .iter()
            .filter(|worker| worker.core.is_busy())
            .count();
        PoolSnapshot {
            workers: self.shared.workers.len(),
            idle: self.shared.workers.len() - busy,
            busy,
            waiting: state.waiting.len(),
        }
    }

    /// Current state of every worker, in index order.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.workers.iter().map(|worker| worker.core.state()).collect()
    }
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn on_worker_idle(&self, index: usize) {
        let mut state = self.lock_state();
        if state.quitting {
            return;
        }
        self.find_tasks_for_worker(&mut state, index);
        self.settle(&mut state, index);
        self.fill_idle_workers(&mut state);
    }

    /// Offer the waiting queue to every idle worker.
    fn fill_idle_workers(&self, state: &mut PoolState) {
        let idle = state.idle.clone();
        for index in idle {
            if state.waiting.is_empty() {
                break;
            }
            self.find_tasks_for_worker(state, index);
            self.settle(state, index);
        }
    }

    /// Move the worker to the list matching its current state.
    fn settle(&self, state: &mut PoolState, index: usize) {
        let busy = self.workers[index].core.is_busy();
        let (from, to) = if busy {
            (&mut state.idle, &mut state.busy)
        } else {
            (&mut state.busy, &mut state.idle)
        };
        from.retain(|&other| other != index);
        if !to.contains(&index) {
            to.push(index);
        }
    }

    /// Hand the worker the first waiting task it may run, then every directly
    /// following task for the same database. Returns how many were handed.
    fn find_tasks_for_worker(&self, state: &mut PoolState, index: usize) -> usize {
        let worker = &self.workers[index];
        // Once a database is passed over, its later tasks must be too or they
        // would overtake it.
        let mut passed: HashSet<DatabaseId> = HashSet::new();
        let mut first = None;

        for (position, task) in state.waiting.iter().enumerate() {
            let id = task.database_id();
            if let Some(id) = id {
                if passed.contains(&id) || self.served_by_other(index, id) || self.pinned_to_other(index, task) {
                    passed.insert(id);
                    continue;
                }
            }
            if worker.core.try_accept(task) {
                first = Some(position);
                break;
            }
            if let Some(id) = id {
                passed.insert(id);
            }
        }

        let Some(position) = first else {
            return 0;
        };
        let mut handed = 0;
        if let Some(task) = state.waiting.remove(position) {
            worker.dispatch(task);
            handed += 1;
        }
        while let Some(task) = state.waiting.get(position) {
            if !worker.core.try_accept_affine(task) {
                break;
            }
            if let Some(task) = state.waiting.remove(position) {
                worker.dispatch(task);
                handed += 1;
            }
        }
        tracing::trace!(worker = worker.core.name(), count = handed, "picked up waiting task(s)");
        handed
    }

    /// A database left mid-transaction may only run on the worker that holds
    /// it. Pins die with the workers of a stopped pool, so a restarted pool
    /// lets any worker pick the transaction up again.
    fn pinned_to_other(&self, index: usize, task: &Task) -> bool {
        let Some(id) = task.pinned_database() else {
            return false;
        };
        self.workers
            .iter()
            .enumerate()
            .any(|(other, worker)| other != index && worker.core.holds(id))
    }

    fn served_by_other(&self, index: usize, id: DatabaseId) -> bool {
        self.workers
            .iter()
            .enumerate()
            .any(|(other, worker)| other != index && worker.core.affinity() == Some(id))
    }
}
