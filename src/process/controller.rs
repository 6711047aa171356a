use crate::error::{Result, WardError};
use crate::process::spawner::{spawn_process, SpawnedProcess};
use crate::process::types::{ManagedProcess, RunState};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

/// Poll interval while waiting for a re-resolved process to disappear
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Thin wrapper over OS spawn and process-tree termination.
///
/// Holds no policy state; restart bookkeeping stays with the caller.
#[derive(Debug, Clone, Copy)]
pub struct ProcessController {
    kill_timeout: Duration,
}

impl ProcessController {
    pub fn new(kill_timeout: Duration) -> Self {
        Self { kill_timeout }
    }

    /// Launch the record's executable and attach the child to the record
    pub fn start(&self, record: &mut ManagedProcess, now: DateTime<Utc>) -> Result<u32> {
        if record.is_running() {
            return Err(WardError::InvalidProcessState(
                record.name().to_string(),
                "already running".to_string(),
            ));
        }

        match spawn_process(&record.spec) {
            Ok(SpawnedProcess { child, pid }) => {
                record.run_state = RunState::Running { child, pid };
                record.last_start = Some(now);
                record.first_unhealthy_time = None;
                record.last_health_check = None;
                debug!(name = %record.name(), pid, "Process launched");
                Ok(pid)
            }
            Err(e) => {
                error!(name = %record.name(), "Failed to start process: {}", e);
                Err(e)
            }
        }
    }

    /// Terminate the record's process tree.
    ///
    /// Idempotent: a never-started or already-exited record is left as is. The
    /// handle is detached from the record before any signal is sent, so a
    /// failed kill can never leave a dangling handle behind.
    pub async fn kill(&self, record: &mut ManagedProcess) {
        let (child, pid) = match std::mem::take(&mut record.run_state) {
            RunState::Running { child, pid } => (child, pid),
            other => {
                record.run_state = other;
                return;
            }
        };

        record.run_state = RunState::Exited { code: None };
        record.first_unhealthy_time = None;

        let name = record.name().to_string();
        if let Some(code) = self.kill_tree(&name, child, pid).await {
            record.run_state = RunState::Exited { code: Some(code) };
            record.last_exit_code = Some(code);
        }
    }

    /// Kill `pid`, its process group and every descendant, then wait for the
    /// leader. Returns the leader's exit code when one was observed.
    async fn kill_tree(&self, name: &str, mut child: Child, pid: u32) -> Option<i32> {
        let descendants = process_tree(pid);

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                // Leader already gone; its group may still hold children
                debug!(name, pid, "Process exited before kill");
                signal_tree(pid, &descendants, false);
                return status.code();
            }
            Err(e) => {
                warn!(name, pid, "Process handle unusable, resolving by pid: {}", e);
                if !kill_by_pid(pid, &descendants, self.kill_timeout).await {
                    warn!(name, pid, "Process still present after {:?}", self.kill_timeout);
                }
                return None;
            }
        }

        signal_tree(pid, &descendants, true);

        match tokio::time::timeout(self.kill_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(name, pid, "Process tree terminated");
                status.code()
            }
            Ok(Err(e)) => {
                warn!(name, pid, "Failed to wait for killed process: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    name,
                    pid,
                    "Process did not exit within {:?} after kill",
                    self.kill_timeout
                );
                None
            }
        }
    }
}

/// Kill a tree without a usable handle and poll until the leader is gone.
///
/// Returns whether `pid` no longer names a live process once done. A
/// zombie counts as gone.
pub async fn kill_by_pid(pid: u32, descendants: &[u32], timeout: Duration) -> bool {
    if !pid_exists(pid) {
        signal_tree(pid, descendants, false);
        return true;
    }

    signal_tree(pid, descendants, true);

    let deadline = tokio::time::Instant::now() + timeout;
    while pid_exists(pid) {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
    true
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Collect every live descendant of `root` (children, grandchildren, ...)
pub fn process_tree(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut found = Vec::new();
    let mut queue = VecDeque::from([Pid::from_u32(root)]);
    while let Some(parent) = queue.pop_front() {
        if let Some(kids) = children.get(&parent) {
            for kid in kids {
                found.push(kid.as_u32());
                queue.push_back(*kid);
            }
        }
    }

    found
}

/// Whether a live (non-zombie) OS process with this pid currently exists
pub fn pid_exists(pid: u32) -> bool {
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system
        .process(sys_pid)
        .map(|process| process.status() != ProcessStatus::Zombie)
        .unwrap_or(false)
}

/// Send SIGKILL to the group led by `pid`, to each descendant, and to `pid`
/// itself when `include_leader` is set.
#[cfg(unix)]
fn signal_tree(pid: u32, descendants: &[u32], include_leader: bool) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid as NixPid;

    match killpg(NixPid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, "Failed to signal process group: {}", e),
    }

    let leader = include_leader.then_some(pid);
    for target in descendants.iter().copied().chain(leader) {
        match kill(NixPid::from_raw(target as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid = target, "Failed to send SIGKILL: {}", e),
        }
    }
}

#[cfg(not(unix))]
fn signal_tree(pid: u32, descendants: &[u32], include_leader: bool) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let leader = include_leader.then_some(pid);
    for target in descendants.iter().copied().chain(leader) {
        if let Some(process) = system.process(Pid::from_u32(target)) {
            if !process.kill() {
                warn!(pid = target, "Failed to kill process");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessSpec;

    fn sleeper(name: &str) -> ManagedProcess {
        let mut spec = ProcessSpec::new(name, "/bin/sleep");
        spec.parameters = "30".to_string();
        ManagedProcess::new(spec)
    }

    #[tokio::test]
    async fn test_start_attaches_child() {
        let controller = ProcessController::default();
        let mut record = sleeper("ctl-start");
        let now = Utc::now();

        let pid = controller.start(&mut record, now).unwrap();

        assert_eq!(record.pid(), Some(pid));
        assert_eq!(record.last_start, Some(now));
        assert!(record.is_running());

        controller.kill(&mut record).await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let controller = ProcessController::default();
        let mut record = sleeper("ctl-twice");

        controller.start(&mut record, Utc::now()).unwrap();
        let second = controller.start(&mut record, Utc::now());
        assert!(matches!(second, Err(WardError::InvalidProcessState(_, _))));

        controller.kill(&mut record).await;
    }

    #[tokio::test]
    async fn test_start_failure_leaves_record_not_running() {
        let controller = ProcessController::default();
        let mut record = ManagedProcess::new(ProcessSpec::new("ctl-missing", "/nonexistent/bin"));

        assert!(controller.start(&mut record, Utc::now()).is_err());
        assert!(matches!(record.run_state, RunState::NotStarted));
        assert!(record.last_start.is_none());
    }

    #[tokio::test]
    async fn test_kill_never_started_is_noop() {
        let controller = ProcessController::default();
        let mut record = sleeper("ctl-noop");

        controller.kill(&mut record).await;
        assert!(matches!(record.run_state, RunState::NotStarted));

        controller.kill(&mut record).await;
        assert!(matches!(record.run_state, RunState::NotStarted));
    }

    #[tokio::test]
    async fn test_kill_running_process() {
        let controller = ProcessController::new(Duration::from_secs(2));
        let mut record = sleeper("ctl-kill");
        let pid = controller.start(&mut record, Utc::now()).unwrap();

        controller.kill(&mut record).await;

        assert!(!record.is_running());
        assert!(record.pid().is_none());
        assert!(matches!(record.run_state, RunState::Exited { .. }));
        assert!(!pid_exists(pid));
    }

    #[tokio::test]
    async fn test_kill_after_exit_clears_handle() {
        let controller = ProcessController::default();
        let mut spec = ProcessSpec::new("ctl-exited", "/bin/sh");
        spec.parameters = r#"-c "exit 2""#.to_string();
        let mut record = ManagedProcess::new(spec);
        controller.start(&mut record, Utc::now()).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        controller.kill(&mut record).await;

        assert!(matches!(record.run_state, RunState::Exited { code: Some(2) }));
        assert_eq!(record.last_exit_code, Some(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_takes_down_grandchildren() {
        let controller = ProcessController::new(Duration::from_secs(2));
        let mut spec = ProcessSpec::new("ctl-tree", "/bin/sh");
        spec.parameters = r#"-c "sleep 30 & sleep 30 & wait""#.to_string();
        let mut record = ManagedProcess::new(spec);
        let pid = controller.start(&mut record, Utc::now()).unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let descendants = process_tree(pid);
        assert!(descendants.len() >= 2, "expected sleep children, got {:?}", descendants);

        controller.kill(&mut record).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        for child in descendants {
            assert!(!pid_exists(child), "descendant {} survived", child);
        }
    }

    #[tokio::test]
    async fn test_kill_by_pid_without_handle() {
        let mut child = std::process::Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(pid_exists(pid));

        assert!(kill_by_pid(pid, &[], Duration::from_secs(2)).await);
        assert!(!pid_exists(pid));
        let _ = child.wait();
    }

    #[tokio::test]
    async fn test_kill_by_pid_already_gone() {
        let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(kill_by_pid(pid, &[], Duration::from_millis(200)).await);
    }
}
