use crate::config::ProcessSpec;
use crate::error::{Result, WardError};
use crate::process::controller::ProcessController;
use crate::process::types::{ManagedProcess, ProcessId};
use crate::state::{DaemonState, PersistedProcess, StateStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// A record shared between the supervisor loop and manual commands
pub type SharedRecord = Arc<Mutex<ManagedProcess>>;

struct Entry {
    id: ProcessId,
    /// Cached for name lookups; names do not change after creation
    name: String,
    record: SharedRecord,
}

/// The authoritative set of managed processes.
///
/// The collection lock only guards structural changes and is never held while
/// a record lock is awaited. Persistence locks records one by one, so callers
/// must not hold a record lock when they call [`ProcessRegistry::persist`].
pub struct ProcessRegistry {
    entries: Mutex<Vec<Entry>>,
    controller: ProcessController,
    store: Option<StateStore>,
    /// Serializes state file writes
    save_lock: Mutex<()>,
}

impl ProcessRegistry {
    /// Empty registry; `store` is None for an in-memory registry
    pub fn new(controller: ProcessController, store: Option<StateStore>) -> Self {
        Self::with_records(controller, store, Vec::new())
    }

    pub fn with_records(
        controller: ProcessController,
        store: Option<StateStore>,
        records: Vec<ManagedProcess>,
    ) -> Self {
        let entries = records
            .into_iter()
            .map(|record| Entry {
                id: record.id,
                name: record.spec.name.clone(),
                record: Arc::new(Mutex::new(record)),
            })
            .collect();

        Self {
            entries: Mutex::new(entries),
            controller,
            store,
            save_lock: Mutex::new(()),
        }
    }

    /// Build a registry from the store's file.
    ///
    /// Any load failure is logged and yields an empty registry.
    pub fn load(controller: ProcessController, store: StateStore) -> Self {
        let records = match store.load() {
            Ok(state) => {
                let records = state.into_records();
                info!(
                    count = records.len(),
                    path = %store.path().display(),
                    "Loaded process state"
                );
                records
            }
            Err(e) => {
                error!(
                    path = %store.path().display(),
                    "Failed to load state, starting with an empty registry: {}",
                    e
                );
                Vec::new()
            }
        };

        Self::with_records(controller, Some(store), records)
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    /// Validate `spec`, register a fresh record for it and persist
    pub async fn add(&self, spec: ProcessSpec) -> Result<ProcessId> {
        spec.validate()?;

        let record = ManagedProcess::new(spec);
        let id = record.id;
        let name = record.spec.name.clone();

        self.entries.lock().await.push(Entry {
            id,
            name: name.clone(),
            record: Arc::new(Mutex::new(record)),
        });

        info!(%id, name = %name, "Process added");
        self.persist_or_log().await;
        Ok(id)
    }

    /// Kill the record's process if alive, delete the record and persist
    pub async fn remove(&self, id: ProcessId) -> Result<()> {
        let record = self
            .get(id)
            .await
            .ok_or_else(|| WardError::ProcessNotFound(id.to_string()))?;

        {
            let mut record = record.lock().await;
            // An in-flight supervision step re-checks this flag before starting
            record.spec.auto_restart = false;
            self.controller.kill(&mut record).await;

            self.entries.lock().await.retain(|entry| entry.id != id);
            info!(%id, name = %record.name(), "Process removed");
        }

        self.persist_or_log().await;
        Ok(())
    }

    pub async fn get(&self, id: ProcessId) -> Option<SharedRecord> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| Arc::clone(&entry.record))
    }

    pub async fn contains(&self, id: ProcessId) -> bool {
        self.entries.lock().await.iter().any(|entry| entry.id == id)
    }

    /// Copy of the current collection
    pub async fn snapshot(&self) -> Vec<(ProcessId, SharedRecord)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|entry| (entry.id, Arc::clone(&entry.record)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Resolve a user-supplied reference: a full id, a unique id prefix or a
    /// unique name, in that order
    pub async fn resolve(&self, reference: &str) -> Result<ProcessId> {
        let entries = self.entries.lock().await;

        if let Ok(id) = reference.parse::<ProcessId>() {
            if entries.iter().any(|entry| entry.id == id) {
                return Ok(id);
            }
            return Err(WardError::ProcessNotFound(reference.to_string()));
        }

        let by_prefix: Vec<ProcessId> = entries
            .iter()
            .filter(|entry| !reference.is_empty() && entry.id.to_string().starts_with(reference))
            .map(|entry| entry.id)
            .collect();
        let by_name: Vec<ProcessId> = entries
            .iter()
            .filter(|entry| entry.name == reference)
            .map(|entry| entry.id)
            .collect();

        for candidates in [by_prefix, by_name] {
            match candidates.as_slice() {
                [] => continue,
                [id] => return Ok(*id),
                _ => return Err(WardError::AmbiguousProcess(reference.to_string())),
            }
        }

        Err(WardError::ProcessNotFound(reference.to_string()))
    }

    /// Write the persisted subset of every record to the state file
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;

        let mut processes = Vec::new();
        for (_, record) in self.snapshot().await {
            processes.push(PersistedProcess::from_record(&*record.lock().await));
        }

        let count = processes.len();
        store.save(&DaemonState::new(processes))?;
        debug!(count, "State saved");
        Ok(())
    }

    /// Persist; a failure is logged and the in-memory state stays authoritative
    pub async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            error!("Failed to persist state: {}", e);
        }
    }
}
