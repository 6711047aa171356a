use crate::config::ProcessSpec;
use crate::error::{Result, WardError};
use crate::process::registry::ProcessRegistry;
use crate::process::restart;
use crate::process::types::{ProcessId, ProcessView};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a manual start or stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualOutcome {
    Started { pid: u32 },
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl ManualOutcome {
    /// Whether the command changed nothing about the OS process
    pub fn is_noop(&self) -> bool {
        matches!(self, ManualOutcome::AlreadyRunning | ManualOutcome::NotRunning)
    }
}

impl std::fmt::Display for ManualOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManualOutcome::Started { pid } => write!(f, "started (pid {})", pid),
            ManualOutcome::AlreadyRunning => write!(f, "already running"),
            ManualOutcome::Stopped => write!(f, "stopped"),
            ManualOutcome::NotRunning => write!(f, "not running"),
        }
    }
}

/// Operations offered to the control surface
pub struct ProcessService {
    registry: Arc<ProcessRegistry>,
    /// How long a manual command holds the automatic loop off
    suppression_window: Duration,
}

impl ProcessService {
    pub fn new(registry: Arc<ProcessRegistry>, suppression_window: Duration) -> Self {
        Self {
            registry,
            suppression_window,
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub async fn add_process(&self, spec: ProcessSpec) -> Result<ProcessId> {
        self.registry.add(spec).await
    }

    pub async fn remove_process(&self, id: ProcessId) -> Result<()> {
        self.registry.remove(id).await
    }

    pub async fn list_processes(&self) -> Vec<ProcessView> {
        let now = Utc::now();
        let mut views = Vec::new();
        for (_, record) in self.registry.snapshot().await {
            views.push(record.lock().await.view(now));
        }
        views
    }

    /// Re-enable automatic restarts and start the process now if it is down.
    ///
    /// Closes the circuit breaker. A start that is not the record's first
    /// counts as a restart.
    pub async fn manual_start(&self, id: ProcessId) -> Result<ManualOutcome> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| WardError::ProcessNotFound(id.to_string()))?;

        let result = {
            let mut record = record.lock().await;
            let now = Utc::now();
            record.spec.auto_restart = true;
            record.suppress_auto_restart(now, self.suppression_window);

            if record.is_running() {
                warn!(name = %record.name(), pid = ?record.pid(), "Manual start ignored, already running");
                Ok(ManualOutcome::AlreadyRunning)
            } else {
                restart::reset(&mut record);
                self.registry
                    .controller()
                    .start(&mut record, now)
                    .map(|pid| {
                        restart::record_start(&mut record, now);
                        info!(name = %record.name(), pid, "Process started manually");
                        ManualOutcome::Started { pid }
                    })
            }
        };

        self.registry.persist_or_log().await;
        result
    }

    /// Disable automatic restarts and kill the process if it is up
    pub async fn manual_stop(&self, id: ProcessId) -> Result<ManualOutcome> {
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| WardError::ProcessNotFound(id.to_string()))?;

        let outcome = {
            let mut record = record.lock().await;
            record.spec.auto_restart = false;
            record.suppress_auto_restart(Utc::now(), self.suppression_window);

            if record.is_running() {
                self.registry.controller().kill(&mut record).await;
                info!(name = %record.name(), "Process stopped manually");
                ManualOutcome::Stopped
            } else {
                warn!(name = %record.name(), "Manual stop ignored, not running");
                ManualOutcome::NotRunning
            }
        };

        self.registry.persist_or_log().await;
        Ok(outcome)
    }
}
