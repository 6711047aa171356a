use crate::config::ProcessSpec;
use crate::process::restart::CircuitBreaker;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Child;
use uuid::Uuid;

/// Unique identifier for a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProcessId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of the OS process owned by a record
#[derive(Debug, Default)]
pub enum RunState {
    /// No process has been launched since the record was created or loaded
    #[default]
    NotStarted,
    /// A child is believed alive; exit is detected lazily
    Running { child: Child, pid: u32 },
    /// The last child is gone; `code` is None when it died from a signal or was killed
    Exited { code: Option<i32> },
}

impl RunState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            RunState::Running { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Running { pid, .. } => write!(f, "running (pid {})", pid),
            RunState::Exited { code: Some(code) } => write!(f, "exited ({})", code),
            RunState::Exited { code: None } => write!(f, "exited"),
        }
    }
}

/// Latest resource measurement of a running process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// One supervised executable: its configuration plus the runtime bookkeeping
#[derive(Debug)]
pub struct ManagedProcess {
    pub id: ProcessId,
    pub spec: ProcessSpec,

    pub restart_count: u64,
    pub last_start: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    /// Timestamps of automatic and manual restarts inside the sliding window
    pub recent_restarts: Vec<DateTime<Utc>>,

    pub is_first_start: bool,
    pub circuit_breaker_tripped: bool,
    pub suppress_auto_restart_until: Option<DateTime<Utc>>,
    pub first_unhealthy_time: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_sample: Option<ResourceSample>,

    pub run_state: RunState,
}

impl ManagedProcess {
    /// Fresh record for a newly added process
    pub fn new(spec: ProcessSpec) -> Self {
        Self::with_id(ProcessId::new(), spec)
    }

    pub fn with_id(id: ProcessId, spec: ProcessSpec) -> Self {
        Self {
            id,
            spec,
            restart_count: 0,
            last_start: None,
            last_exit_code: None,
            recent_restarts: Vec::new(),
            is_first_start: true,
            circuit_breaker_tripped: false,
            suppress_auto_restart_until: None,
            first_unhealthy_time: None,
            last_health_check: None,
            last_sample: None,
            run_state: RunState::NotStarted,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.run_state.pid()
    }

    /// Poll the child and move Running to Exited if it has terminated.
    ///
    /// Returns true when an exit was observed by this call. A failed status check is
    /// treated as an exit with no code. Whichever caller observes the exit, the
    /// health bookkeeping of the dead child is cleared and the exit is logged.
    pub fn refresh_exit(&mut self) -> bool {
        let status = match &mut self.run_state {
            RunState::Running { child, .. } => child.try_wait(),
            _ => return false,
        };

        let code = match status {
            Ok(None) => return false,
            Ok(Some(status)) => status.code(),
            Err(e) => {
                tracing::warn!(name = %self.spec.name, "Failed to check process status: {}", e);
                None
            }
        };

        let pid = self.run_state.pid();
        self.run_state = RunState::Exited { code };
        self.last_exit_code = code;
        self.reset_health();
        tracing::info!(name = %self.spec.name, pid = ?pid, exit_code = ?code, "Process exited");
        true
    }

    /// Whether a child is alive right now
    pub fn is_running(&mut self) -> bool {
        self.refresh_exit();
        self.run_state.is_running()
    }

    /// Whether the automatic loop is allowed to start this record at `now`
    pub fn wants_auto_restart(&self, now: DateTime<Utc>) -> bool {
        let suppressed = self
            .suppress_auto_restart_until
            .map(|until| now < until)
            .unwrap_or(false);
        self.spec.auto_restart && !suppressed
    }

    pub fn suppress_auto_restart(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        self.suppress_auto_restart_until =
            Some(now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    /// Clear all transient health bookkeeping (used whenever the child goes away)
    pub fn reset_health(&mut self) {
        self.first_unhealthy_time = None;
        self.last_health_check = None;
        self.last_sample = None;
    }

    /// Build the externally visible view of this record at `now`
    pub fn view(&mut self, now: DateTime<Utc>) -> ProcessView {
        let is_running = self.is_running();
        let recent_restart_count =
            CircuitBreaker::from_spec(&self.spec).count_recent(&self.recent_restarts, now);

        let health_visible = self.spec.health_check.enabled && is_running;
        let (is_healthy, health_status) = match self.first_unhealthy_time {
            Some(since) if health_visible => (
                false,
                Some(format!("Unhealthy for {}s", (now - since).num_seconds())),
            ),
            None if health_visible => (true, Some("Healthy".to_string())),
            _ => (true, None),
        };

        let sample = self.last_sample.unwrap_or(ResourceSample {
            cpu_percent: 0.0,
            memory_mb: 0.0,
        });

        ProcessView {
            id: self.id,
            name: self.spec.name.clone(),
            executable: self.spec.executable.clone(),
            parameters: self.spec.parameters.clone(),
            restart_delay_secs: self.spec.restart_delay_secs,
            restart_count: self.restart_count,
            last_start: self.last_start,
            last_exit_code: self.last_exit_code,
            pid: self.pid(),
            is_running,
            auto_restart: self.spec.auto_restart,
            max_restart_attempts: self.spec.max_restart_attempts,
            restart_window_minutes: self.spec.restart_window_minutes,
            circuit_breaker_tripped: self.circuit_breaker_tripped,
            recent_restart_count,
            health_check_enabled: self.spec.health_check.enabled,
            cpu_percent: round_one_decimal(sample.cpu_percent),
            memory_mb: round_one_decimal(sample.memory_mb),
            last_health_check: self.last_health_check,
            is_healthy,
            health_status,
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Snapshot of a managed process as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessView {
    pub id: ProcessId,
    pub name: String,
    pub executable: PathBuf,
    pub parameters: String,
    pub restart_delay_secs: u64,
    pub restart_count: u64,
    pub last_start: Option<DateTime<Utc>>,
    pub last_exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub is_running: bool,
    pub auto_restart: bool,
    pub max_restart_attempts: usize,
    pub restart_window_minutes: u64,
    pub circuit_breaker_tripped: bool,
    /// Restarts inside the current window
    pub recent_restart_count: usize,
    pub health_check_enabled: bool,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    /// "Healthy" or "Unhealthy for {N}s"; absent unless health checking is on and the process runs
    pub health_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    fn spec() -> ProcessSpec {
        ProcessSpec::new("types-test", "/bin/sleep")
    }

    #[test]
    fn test_new_record_defaults() {
        let record = ManagedProcess::new(spec());

        assert!(record.is_first_start);
        assert_eq!(record.restart_count, 0);
        assert!(record.recent_restarts.is_empty());
        assert!(!record.circuit_breaker_tripped);
        assert!(matches!(record.run_state, RunState::NotStarted));
        assert!(record.pid().is_none());
    }

    #[test]
    fn test_process_id_round_trip_through_string() {
        let id = ProcessId::new();
        let parsed: ProcessId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_wants_auto_restart_respects_suppression() {
        let mut record = ManagedProcess::new(spec());
        let now = Utc::now();

        assert!(record.wants_auto_restart(now));

        record.suppress_auto_restart(now, chrono::Duration::seconds(5));
        assert!(!record.wants_auto_restart(now + chrono::Duration::seconds(4)));
        assert!(record.wants_auto_restart(now + chrono::Duration::seconds(5)));

        record.spec.auto_restart = false;
        assert!(!record.wants_auto_restart(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_view_of_stopped_record_hides_health_status() {
        let mut record = ManagedProcess::new(spec());
        record.spec.health_check.enabled = true;
        record.first_unhealthy_time = Some(Utc::now());
        record.last_sample = Some(ResourceSample {
            cpu_percent: 12.345,
            memory_mb: 99.96,
        });

        let view = record.view(Utc::now());

        assert!(!view.is_running);
        assert!(view.health_status.is_none());
        assert!(view.is_healthy);
        assert_eq!(view.cpu_percent, 12.3);
        assert_eq!(view.memory_mb, 100.0);
    }

    #[tokio::test]
    async fn test_view_reports_unhealthy_duration() {
        let mut record = ManagedProcess::new(spec());
        record.spec.health_check.enabled = true;
        let child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        record.run_state = RunState::Running { child, pid };

        let now = Utc::now();
        assert_eq!(record.view(now).health_status.as_deref(), Some("Healthy"));

        record.first_unhealthy_time = Some(now - chrono::Duration::seconds(42));
        let view = record.view(now);
        assert!(!view.is_healthy);
        assert_eq!(view.health_status.as_deref(), Some("Unhealthy for 42s"));
        assert_eq!(view.pid, Some(pid));

        if let RunState::Running { child, .. } = &mut record.run_state {
            let _ = child.kill().await;
        }
    }

    #[test]
    fn test_view_counts_only_recent_restarts() {
        let mut record = ManagedProcess::new(spec());
        let now = Utc::now();
        record.recent_restarts = vec![now - chrono::Duration::minutes(10), now];
        record.restart_count = 7;

        let view = record.view(now);
        assert_eq!(view.recent_restart_count, 1);
        assert_eq!(view.restart_count, 7);
    }

    #[tokio::test]
    async fn test_refresh_exit_captures_code() {
        let mut record = ManagedProcess::new(spec());
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        let _ = child.wait().await;

        record.run_state = RunState::Running { child, pid };

        assert!(record.refresh_exit());
        assert!(matches!(record.run_state, RunState::Exited { code: Some(3) }));
        assert_eq!(record.last_exit_code, Some(3));
        assert!(!record.refresh_exit());
        assert!(!record.is_running());
    }

    #[tokio::test]
    async fn test_exit_seen_by_any_caller_clears_health() {
        let mut record = ManagedProcess::new(spec());
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");
        let _ = child.wait().await;

        let now = Utc::now();
        record.run_state = RunState::Running { child, pid };
        record.first_unhealthy_time = Some(now);
        record.last_health_check = Some(now);
        record.last_sample = Some(ResourceSample {
            cpu_percent: 1.0,
            memory_mb: 2.0,
        });

        // The listing view is the first to notice the exit
        let view = record.view(now);
        assert!(!view.is_running);
        assert_eq!(view.last_exit_code, Some(5));

        assert!(record.first_unhealthy_time.is_none());
        assert!(record.last_health_check.is_none());
        assert!(record.last_sample.is_none());
    }
}
