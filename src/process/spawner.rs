use crate::config::{expand_env_in_path, expand_env_in_string, split_arguments, ProcessSpec};
use crate::error::{Result, WardError};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,
}

/// Resolve the executable path and argv for a spec, expanding environment references
pub fn resolve_command(spec: &ProcessSpec) -> Result<(PathBuf, Vec<String>)> {
    let executable = expand_env_in_path(&spec.executable);
    let args = split_arguments(&expand_env_in_string(&spec.parameters)).map_err(|e| {
        WardError::SpawnError(format!("Process '{}' has unusable arguments: {}", spec.name, e))
    })?;
    Ok((executable, args))
}

/// Launch the process described by `spec`.
///
/// The child runs without a shell, with stdin detached and stdout/stderr
/// inherited from the supervisor. On Unix it leads its own process group so
/// the whole tree can be signalled at once.
pub fn spawn_process(spec: &ProcessSpec) -> Result<SpawnedProcess> {
    let (executable, args) = resolve_command(spec)?;

    let mut command = Command::new(&executable);
    command.args(&args).stdin(Stdio::null());

    #[cfg(unix)]
    {
        // SAFETY: setpgid is async-signal-safe and touches no shared state
        unsafe {
            command.pre_exec(|| {
                if nix::libc::setpgid(0, 0) == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            });
        }
    }

    let child = command.spawn().map_err(|e| {
        WardError::SpawnError(format!(
            "Failed to spawn process '{}' ({}): {}",
            spec.name,
            executable.display(),
            e
        ))
    })?;

    let pid = child.id().ok_or_else(|| {
        WardError::SpawnError(format!("Failed to get PID for process '{}'", spec.name))
    })?;

    Ok(SpawnedProcess { child, pid })
}
