use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::db::{Database, DatabaseId};

pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// One unit of work bound to the database it runs against.
pub struct Task {
    pub(crate) database: Option<Arc<Database>>,
    work: Work,
    seq: u64,
}

impl Task {
    pub(crate) fn new(database: Option<Arc<Database>>, work: Work, seq: u64) -> Self {
        Self { database, work, seq }
    }

    pub fn database_id(&self) -> Option<DatabaseId> {
        self.database.as_ref().map(|database| database.id())
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Identity of the bound database while it is mid-transaction.
    pub(crate) fn pinned_database(&self) -> Option<DatabaseId> {
        self.database
            .as_ref()
            .filter(|database| database.in_transaction())
            .map(|database| database.id())
    }

    /// Run the work, containing any panic. Returns the database so the worker
    /// can update its bookkeeping afterwards.
    pub(crate) fn run(self) -> Option<Arc<Database>> {
        let Self { database, work, seq } = self;
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!(
                db = database.as_ref().map(|database| database.id()),
                task = seq,
                "task panicked; its reply was completed with an error"
            );
        }
        database
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("database", &self.database_id())
            .field("seq", &self.seq)
            .finish()
    }
}
