// State module - Persistent storage for the process registry

use crate::config::ProcessSpec;
use crate::error::{Result, WardError};
use crate::process::{ManagedProcess, ProcessId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Version of the state file format
const STATE_VERSION: &str = "1.0.0";

/// The persisted subset of a managed process.
///
/// Runtime-only fields (handle, samples, health timers, suppression window,
/// breaker flag) are never written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedProcess {
    pub id: ProcessId,
    pub spec: ProcessSpec,
    pub restart_count: u64,
    #[serde(default)]
    pub recent_restarts: Vec<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
}

impl PersistedProcess {
    pub fn from_record(record: &ManagedProcess) -> Self {
        Self {
            id: record.id,
            spec: record.spec.clone(),
            restart_count: record.restart_count,
            recent_restarts: record.recent_restarts.clone(),
            last_start: record.last_start,
            last_exit_code: record.last_exit_code,
        }
    }

    /// Rebuild a record; it has no handle and its next start counts as a restart
    pub fn into_record(self) -> ManagedProcess {
        let mut record = ManagedProcess::with_id(self.id, self.spec);
        record.restart_count = self.restart_count;
        record.recent_restarts = self.recent_restarts;
        record.last_start = self.last_start;
        record.last_exit_code = self.last_exit_code;
        record.is_first_start = false;
        record
    }
}

/// Complete registry state that gets persisted to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub version: String,
    pub processes: Vec<PersistedProcess>,
    pub last_updated: DateTime<Utc>,
}

impl DaemonState {
    pub fn new(processes: Vec<PersistedProcess>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            processes,
            last_updated: Utc::now(),
        }
    }

    /// Validate the state structure
    pub fn validate(&self) -> Result<()> {
        if self.version != STATE_VERSION {
            return Err(WardError::StateCorruption(format!(
                "Incompatible state version: expected {}, found {}",
                STATE_VERSION, self.version
            )));
        }

        let mut seen_ids = HashSet::new();
        for process in &self.processes {
            if !seen_ids.insert(process.id) {
                return Err(WardError::StateCorruption(format!(
                    "Duplicate process ID found: {}",
                    process.id
                )));
            }
            process.spec.validate().map_err(|e| {
                WardError::StateCorruption(format!("Invalid entry {}: {}", process.id, e))
            })?;
        }

        Ok(())
    }

    /// Hydrate every entry into a fresh record
    pub fn into_records(self) -> Vec<ManagedProcess> {
        self.processes
            .into_iter()
            .map(PersistedProcess::into_record)
            .collect()
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// State store handles persistence of the registry to disk
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Load state from disk.
    ///
    /// A missing file is an empty state. Anything unreadable is an error so the
    /// caller can report it and fall back to an empty registry.
    pub fn load(&self) -> Result<DaemonState> {
        if !self.path.exists() {
            return Ok(DaemonState::default());
        }

        let file = File::open(&self.path).map_err(|e| {
            WardError::StateLoadError(format!("Failed to open state file: {}", e))
        })?;

        let state: DaemonState = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            WardError::StateLoadError(format!("Failed to parse state file: {}", e))
        })?;

        state.validate()?;

        Ok(state)
    }

    /// Save state to disk through a temporary file and a rename
    pub fn save(&self, state: &DaemonState) -> Result<()> {
        state.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WardError::StateSaveError(format!("Failed to create state directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                WardError::StateSaveError(format!("Failed to create temp state file: {}", e))
            })?;

            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
                WardError::StateSaveError(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                WardError::StateSaveError(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            WardError::StateSaveError(format!("Failed to rename temp state file: {}", e))
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
