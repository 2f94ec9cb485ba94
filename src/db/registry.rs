use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::LogLevel;

use super::{is_in_memory_path, Database, DatabaseId};

/// Parameters of an `openDatabase` request after defaults are applied.
#[derive(Debug, Clone)]
pub struct OpenConfig {
    pub path: Option<String>,
    pub read_only: bool,
    pub single_instance: bool,
    pub log_level: LogLevel,
}

impl OpenConfig {
    /// In-memory databases are never single-instance.
    pub fn new(path: Option<String>, read_only: bool, single_instance: Option<bool>, log_level: LogLevel) -> Self {
        let in_memory = is_in_memory_path(path.as_deref());
        Self {
            single_instance: single_instance != Some(false) && !in_memory,
            path,
            read_only,
            log_level,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Registration {
    /// A new identity; the caller must schedule the open.
    Created(Arc<Database>),
    /// An already open single-instance database at the same path.
    Recovered(Arc<Database>),
}

#[derive(Default)]
struct RegistryState {
    last_id: DatabaseId,
    databases: BTreeMap<DatabaseId, Arc<Database>>,
    single_instances: HashMap<String, DatabaseId>,
}

/// Identity → Database map shared between the request path and the workers.
#[derive(Default)]
pub struct DatabaseRegistry {
    state: Mutex<RegistryState>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reuse the single-instance database at `open_config.path`, or register a new
    /// identity. Lookup and registration happen under one lock.
    pub fn open_or_recover(&self, open_config: &OpenConfig) -> Registration {
        let mut state = self.lock();

        if open_config.single_instance {
            if let Some(path) = open_config.path.as_deref() {
                if open_config.log_level.has_verbose() {
                    tracing::trace!("look for {path} in {} single instance(s)", state.single_instances.len());
                }
                let existing = state
                    .single_instances
                    .get(path)
                    .and_then(|id| state.databases.get(id))
                    .cloned();
                if let Some(database) = existing {
                    if open_config.log_level.has_verbose() {
                        tracing::trace!(
                            db = database.id(),
                            in_transaction = database.in_transaction(),
                            "re-opened single instance {path}"
                        );
                    }
                    return Registration::Recovered(database);
                }
            }
        }

        state.last_id += 1;
        let id = state.last_id;
        let database = Arc::new(Database::new(id, open_config));
        if open_config.single_instance {
            state.single_instances.insert(database.path().to_string(), id);
        }
        state.databases.insert(id, database.clone());
        Registration::Created(database)
    }

    pub fn get(&self, id: DatabaseId) -> Option<Arc<Database>> {
        self.lock().databases.get(&id).cloned()
    }

    /// Forget `id`. Returns the database when it was registered.
    pub fn remove(&self, id: DatabaseId) -> Option<Arc<Database>> {
        let mut state = self.lock();
        let database = state.databases.remove(&id)?;
        if database.single_instance() && state.single_instances.get(database.path()) == Some(&id) {
            state.single_instances.remove(database.path());
        }
        Some(database)
    }

    /// Detach the open single-instance database at `path`, if any.
    pub fn take_single_instance(&self, path: &str) -> Option<Arc<Database>> {
        let mut state = self.lock();
        let id = state.single_instances.remove(path)?;
        state.databases.remove(&id)
    }

    pub fn databases(&self) -> Vec<Arc<Database>> {
        self.lock().databases.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().databases.is_empty()
    }
}
