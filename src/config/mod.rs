use crate::error::{Result, WardError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resource-based health check settings for a managed process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Whether health checking is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Minimum number of seconds between two samples
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Resident memory ceiling in MB (0 disables the check)
    #[serde(default)]
    pub max_memory_mb: f64,

    /// CPU ceiling in percent of the whole machine (0 disables the check)
    #[serde(default)]
    pub max_cpu_percent: f64,

    /// CPU floor in percent, used to detect hung processes (0 disables the check)
    #[serde(default)]
    pub min_cpu_percent: f64,

    /// How long a process may stay unhealthy before it is killed
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_health_interval(),
            max_memory_mb: 0.0,
            max_cpu_percent: 0.0,
            min_cpu_percent: 0.0,
            unhealthy_threshold_secs: default_unhealthy_threshold(),
        }
    }
}

/// Definition of a process to supervise, as submitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Display name
    pub name: String,

    /// Path to the executable; environment references are expanded at start
    pub executable: PathBuf,

    /// Argument string, split into argv without a shell
    #[serde(default)]
    pub parameters: String,

    /// Delay before an automatic restart (in seconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Restarts allowed inside the window before the circuit breaker trips
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: usize,

    /// Length of the sliding restart window (in minutes)
    #[serde(default = "default_restart_window")]
    pub restart_window_minutes: u64,

    /// Whether to automatically restart on exit
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

// Default value functions for serde
fn default_restart_delay() -> u64 {
    5
}

fn default_max_restart_attempts() -> usize {
    10
}

fn default_restart_window() -> u64 {
    5
}

fn default_auto_restart() -> bool {
    true
}

fn default_health_interval() -> u64 {
    30
}

fn default_unhealthy_threshold() -> u64 {
    60
}

/// Upper bound for the restart window; keeps window arithmetic inside the
/// representable timestamp range
pub const MAX_RESTART_WINDOW_MINUTES: u64 = 60 * 24 * 366;

/// Upper bound for every seconds-valued policy setting
pub const MAX_POLICY_SECS: u64 = 60 * 60 * 24 * 366;

impl ProcessSpec {
    /// Create a spec with default policy settings
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            parameters: String::new(),
            restart_delay_secs: default_restart_delay(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_window_minutes: default_restart_window(),
            auto_restart: default_auto_restart(),
            health_check: HealthCheckConfig::default(),
        }
    }

    /// Load process specs from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<ProcessSpec>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardError::ConfigError(format!("Failed to read spec file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let specs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WardError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for spec in &specs {
            spec.validate()?;
        }

        Ok(specs)
    }

    fn parse_toml(contents: &str) -> Result<Vec<ProcessSpec>> {
        #[derive(Deserialize)]
        struct SpecFile {
            #[serde(default)]
            processes: Vec<ProcessSpec>,
            #[serde(flatten)]
            single: Option<ProcessSpec>,
        }

        let spec_file: SpecFile = toml::from_str(contents)
            .map_err(|e| WardError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        if let Some(single) = spec_file.single {
            Ok(vec![single])
        } else if !spec_file.processes.is_empty() {
            Ok(spec_file.processes)
        } else {
            Err(WardError::InvalidConfig(
                "No process definition found in file".to_string(),
            ))
        }
    }

    fn parse_json(contents: &str) -> Result<Vec<ProcessSpec>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum SpecFile {
            Single(ProcessSpec),
            Multiple { processes: Vec<ProcessSpec> },
        }

        let spec_file: SpecFile = serde_json::from_str(contents)
            .map_err(|e| WardError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        match spec_file {
            SpecFile::Single(spec) => Ok(vec![spec]),
            SpecFile::Multiple { processes } if processes.is_empty() => Err(
                WardError::InvalidConfig("No process definition found in file".to_string()),
            ),
            SpecFile::Multiple { processes } => Ok(processes),
        }
    }

    /// Validate the spec before it is accepted into the registry
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WardError::MissingConfigField("name".to_string()));
        }

        if self.executable.as_os_str().is_empty() {
            return Err(WardError::MissingConfigField("executable".to_string()));
        }

        if self.max_restart_attempts == 0 {
            return Err(WardError::ConfigValidationError(
                "max_restart_attempts must be at least 1".to_string(),
            ));
        }

        if self.restart_window_minutes == 0 {
            return Err(WardError::ConfigValidationError(
                "restart_window_minutes must be at least 1".to_string(),
            ));
        }

        if self.restart_window_minutes > MAX_RESTART_WINDOW_MINUTES {
            return Err(WardError::ConfigValidationError(format!(
                "restart_window_minutes cannot exceed {}",
                MAX_RESTART_WINDOW_MINUTES
            )));
        }

        let health = &self.health_check;
        for (field, value) in [
            ("restart_delay_secs", self.restart_delay_secs),
            ("health_check.interval_secs", health.interval_secs),
            (
                "health_check.unhealthy_threshold_secs",
                health.unhealthy_threshold_secs,
            ),
        ] {
            if value > MAX_POLICY_SECS {
                return Err(WardError::ConfigValidationError(format!(
                    "{} cannot exceed {}",
                    field, MAX_POLICY_SECS
                )));
            }
        }

        split_arguments(&self.parameters)?;

        if health.enabled && health.interval_secs == 0 {
            return Err(WardError::ConfigValidationError(
                "health_check.interval_secs must be at least 1".to_string(),
            ));
        }

        for (field, value) in [
            ("max_memory_mb", health.max_memory_mb),
            ("max_cpu_percent", health.max_cpu_percent),
            ("min_cpu_percent", health.min_cpu_percent),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(WardError::ConfigValidationError(format!(
                    "health_check.{} must be a non-negative number",
                    field
                )));
            }
        }

        if health.max_cpu_percent > 0.0 && health.min_cpu_percent > health.max_cpu_percent {
            return Err(WardError::ConfigValidationError(
                "health_check.min_cpu_percent cannot exceed max_cpu_percent".to_string(),
            ));
        }

        Ok(())
    }

    /// Restart delay as Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Restart window as a chrono duration, for timestamp arithmetic
    ///
    /// Saturates for windows that do not fit a chrono duration.
    pub fn restart_window(&self) -> chrono::Duration {
        i64::try_from(self.restart_window_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Expand `$VAR`, `${VAR}` and `%VAR%` references from the current environment.
///
/// Unknown variables are left untouched.
pub fn expand_env_in_string(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '$' if chars.get(i + 1) == Some(&'{') => {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    match std::env::var(&name) {
                        Ok(value) if !name.is_empty() => out.push_str(&value),
                        _ => out.extend(&chars[i..i + 3 + close]),
                    }
                    i += 3 + close;
                    continue;
                }
            }
            '$' => {
                let len = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .count();
                if len > 0 {
                    let name: String = chars[i + 1..i + 1 + len].iter().collect();
                    match std::env::var(&name) {
                        Ok(value) => out.push_str(&value),
                        Err(_) => out.extend(&chars[i..i + 1 + len]),
                    }
                    i += 1 + len;
                    continue;
                }
            }
            '%' => {
                if let Some(close) = chars[i + 1..].iter().position(|&c| c == '%') {
                    let name: String = chars[i + 1..i + 1 + close].iter().collect();
                    let valid = !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if valid {
                        if let Ok(value) = std::env::var(&name) {
                            out.push_str(&value);
                            i += 2 + close;
                            continue;
                        }
                    }
                }
            }
            _ => {}
        }

        out.push(chars[i]);
        i += 1;
    }

    out
}

/// Expand environment variables in a path
pub fn expand_env_in_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_in_string(&path.to_string_lossy()))
}

/// Split an argument string into argv with shell quoting rules.
///
/// No shell is involved: there is no globbing, piping or variable evaluation.
pub fn split_arguments(parameters: &str) -> Result<Vec<String>> {
    shell_words::split(parameters).map_err(|e| {
        WardError::InvalidConfig(format!("Invalid parameters '{}': {}", parameters, e))
    })
}

/// Default paths for daemon state, socket and pid file
const DEFAULT_STATE_PATH: &str = "/tmp/procward_state.json";
const DEFAULT_SOCKET_PATH: &str = "/tmp/procward.sock";
const DEFAULT_PID_PATH: &str = "/tmp/procward.pid";

/// Settings for the supervisor daemon itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_pid_path")]
    pub pid_path: PathBuf,

    /// Supervisor tick period (in milliseconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Length of the CPU sampling window (in milliseconds)
    #[serde(default = "default_sample_window")]
    pub sample_window_ms: u64,

    /// Upper bound on waiting for a killed process to exit (in seconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_secs: u64,

    /// How long a manual start/stop holds off the automatic loop (in seconds)
    #[serde(default = "default_suppression")]
    pub suppression_secs: u64,

    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_pid_path() -> PathBuf {
    PathBuf::from(DEFAULT_PID_PATH)
}

fn default_tick_interval() -> u64 {
    2000
}

fn default_sample_window() -> u64 {
    500
}

fn default_kill_timeout() -> u64 {
    5
}

fn default_suppression() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            socket_path: default_socket_path(),
            pid_path: default_pid_path(),
            tick_interval_ms: default_tick_interval(),
            sample_window_ms: default_sample_window(),
            kill_timeout_secs: default_kill_timeout(),
            suppression_secs: default_suppression(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load daemon settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let mut config: DaemonConfig = toml::from_str(&contents)
            .map_err(|e| WardError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        config.state_path = expand_env_in_path(&config.state_path);
        config.socket_path = expand_env_in_path(&config.socket_path);
        config.pid_path = expand_env_in_path(&config.pid_path);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(WardError::ConfigValidationError(
                "tick_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.sample_window_ms == 0 {
            return Err(WardError::ConfigValidationError(
                "sample_window_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_millis(self.sample_window_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn suppression_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.suppression_secs as i64)
    }
}
