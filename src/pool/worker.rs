use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::mpsc;

use crate::db::{Database, DatabaseId};

use super::task::Task;
use super::PoolShared;

/// Scheduling state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// Affined to `database` with `in_flight` tasks handed to the thread.
    Serving {
        database: Option<DatabaseId>,
        in_flight: usize,
    },
}

#[derive(Debug)]
struct WorkerInner {
    state: WorkerState,
    /// Databases left mid-transaction by this worker. Only this worker may
    /// run them until the transaction ends.
    allow_list: HashSet<DatabaseId>,
}

/// The part of a worker shared between the pool and its thread.
#[derive(Debug)]
pub(crate) struct WorkerCore {
    name: String,
    inner: Mutex<WorkerInner>,
}

impl WorkerCore {
    fn new(name: String) -> Self {
        Self {
            name,
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Idle,
                allow_list: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.lock().state
    }

    pub(crate) fn is_busy(&self) -> bool {
        !matches!(self.state(), WorkerState::Idle)
    }

    pub(crate) fn affinity(&self) -> Option<DatabaseId> {
        match self.state() {
            WorkerState::Serving { database, .. } => database,
            WorkerState::Idle => None,
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        match self.state() {
            WorkerState::Serving { in_flight, .. } => in_flight,
            WorkerState::Idle => 0,
        }
    }

    /// Whether this worker left `id` mid-transaction.
    pub(crate) fn holds(&self, id: DatabaseId) -> bool {
        self.lock().allow_list.contains(&id)
    }

    /// Accept `task` when idle or already affined to its database.
    pub(crate) fn try_accept(&self, task: &Task) -> bool {
        self.accept(task, true)
    }

    /// Like [`WorkerCore::try_accept`], but never wakes an idle worker.
    pub(crate) fn try_accept_affine(&self, task: &Task) -> bool {
        self.accept(task, false)
    }

    fn accept(&self, task: &Task, allow_idle: bool) -> bool {
        let mut inner = self.lock();
        let id = task.database_id();
        inner.state = match inner.state {
            WorkerState::Idle if allow_idle => WorkerState::Serving {
                database: id,
                in_flight: 1,
            },
            WorkerState::Serving { database, in_flight } if id.is_some() && database == id => {
                WorkerState::Serving {
                    database,
                    in_flight: in_flight + 1,
                }
            }
            _ => return false,
        };
        true
    }

    /// Bookkeeping after a task ran. Returns true when the worker went idle.
    fn complete(&self, database: Option<&Database>) -> bool {
        let mut inner = self.lock();
        if let Some(database) = database {
            if database.in_transaction() {
                inner.allow_list.insert(database.id());
            } else {
                inner.allow_list.remove(&database.id());
            }
        }
        inner.state = match inner.state {
            WorkerState::Serving { database, in_flight } if in_flight > 1 => WorkerState::Serving {
                database,
                in_flight: in_flight - 1,
            },
            _ => WorkerState::Idle,
        };
        inner.state == WorkerState::Idle
    }
}

/// One named execution thread plus its channel.
pub(crate) struct DatabaseWorker {
    pub(crate) core: Arc<WorkerCore>,
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
}

impl DatabaseWorker {
    /// Spawn the worker thread. `pool` is notified each time the worker runs
    /// out of in-flight tasks.
    pub(crate) fn spawn(name: String, index: usize, pool: Weak<PoolShared>) -> std::io::Result<Self> {
        let core = Arc::new(WorkerCore::new(name.clone()));
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();

        let thread_core = core.clone();
        let handle = std::thread::Builder::new().name(name).spawn(move || {
            while let Some(task) = receiver.blocking_recv() {
                let database = task.run();
                if thread_core.complete(database.as_deref()) {
                    if let Some(pool) = pool.upgrade() {
                        pool.on_worker_idle(index);
                    }
                }
            }
            tracing::trace!(worker = thread_core.name(), "worker stopped");
        })?;

        Ok(Self {
            core,
            sender: Mutex::new(Some(sender)),
            thread_id: Some(handle.thread().id()),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    /// Hand an accepted task to the thread. A closed channel drops the task,
    /// which completes its reply with an error.
    pub(crate) fn dispatch(&self, task: Task) {
        let sender = self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match sender.as_ref() {
            Some(sender) => {
                if let Err(mpsc::error::SendError(task)) = sender.send(task) {
                    tracing::warn!(worker = self.core.name(), db = task.database_id(), "worker channel closed");
                }
            }
            None => {
                tracing::warn!(worker = self.core.name(), db = task.database_id(), "worker already stopped");
            }
        }
    }

    /// Close the channel. Tasks already queued on it still run.
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub(crate) fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
