// PID file guarding against a second daemon instance

use crate::error::{Result, WardError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Manages the daemon PID file
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Claim the PID file for this process.
    ///
    /// Fails when a live process owns it; a stale file is replaced.
    pub fn acquire(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            return Err(WardError::DaemonAlreadyRunning(pid));
        }

        if self.exists() {
            warn!(path = %self.path.display(), "Removing stale PID file");
            self.remove()?;
        }

        self.write()
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WardError::StateError(format!("Failed to create PID file directory: {}", e))
            })?;
        }

        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| WardError::StateError(format!("Failed to write PID file: {}", e)))
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| WardError::StateError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| WardError::StateError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path)
                .map_err(|e| WardError::StateError(format!("Failed to remove PID file: {}", e)))?;
        }
        Ok(())
    }

    /// PID recorded in the file, if that process is still alive
    pub fn running_pid(&self) -> Option<u32> {
        let pid = self.read().ok()?;
        is_process_alive(pid).then_some(pid)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only checks for existence
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
