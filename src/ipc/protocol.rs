// IPC Protocol definitions for client-daemon communication

use crate::config::ProcessSpec;
use crate::process::{ManualOutcome, ProcessId, ProcessView};
use serde::{Deserialize, Serialize};

/// A process reference as typed by the user: full id, id prefix or name
pub type ProcessRef = String;

/// All available commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Register a new process
    Add(ProcessSpec),
    /// Kill (if running) and forget a process
    Remove(ProcessRef),
    /// List every process
    List,
    /// Manual start
    Start(ProcessRef),
    /// Manual stop
    Stop(ProcessRef),
    /// Daemon status
    Status,
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    Added { id: ProcessId, name: String },
    Removed { id: ProcessId },
    ProcessList(Vec<ProcessView>),
    Started { id: ProcessId, outcome: ManualOutcome },
    Stopped { id: ProcessId, outcome: ManualOutcome },
    DaemonStatus {
        pid: u32,
        uptime_secs: u64,
        process_count: usize,
    },
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, String>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: String) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}
