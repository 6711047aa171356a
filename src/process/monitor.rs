use crate::config::HealthCheckConfig;
use crate::error::{Result, WardError};
use crate::process::types::{ManagedProcess, ResourceSample};
use chrono::{DateTime, Utc};
use std::time::Duration;
use sysinfo::{CpuRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Measures CPU and resident memory of a single process over a short window
pub struct HealthSampler {
    /// System information collector
    system: System,
    /// Number of logical CPUs, used to scale CPU usage to 0-100%
    core_count: usize,
    /// Wall-clock length of one CPU measurement
    sample_window: Duration,
}

impl HealthSampler {
    /// Only the CPU list is loaded up front; processes are refreshed by pid
    pub fn new(sample_window: Duration) -> Self {
        let system =
            System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
        let core_count = system.cpus().len().max(1);

        Self {
            system,
            core_count,
            sample_window,
        }
    }

    /// Take one sample of `pid`.
    ///
    /// Refreshes the process, waits the sampling window, refreshes again and
    /// derives CPU usage from the delta. Returns `Ok(None)` when cancelled
    /// during the window.
    pub async fn sample(
        &mut self,
        pid: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<ResourceSample>> {
        let sys_pid = Pid::from_u32(pid);

        self.refresh(sys_pid);
        if self.system.process(sys_pid).is_none() {
            return Err(WardError::SampleError(
                pid.to_string(),
                "process not found".to_string(),
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(self.sample_window) => {}
        }

        self.refresh(sys_pid);
        let process = self.system.process(sys_pid).ok_or_else(|| {
            WardError::SampleError(pid.to_string(), "process exited while sampling".to_string())
        })?;

        // sysinfo reports usage relative to one core; scale to the whole machine
        let cpu_percent = process.cpu_usage() as f64 / self.core_count as f64;
        let memory_mb = process.memory() as f64 / BYTES_PER_MB;

        Ok(Some(ResourceSample {
            cpu_percent,
            memory_mb,
        }))
    }

    fn refresh(&mut self, pid: Pid) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
    }
}

/// Outcome of comparing one sample against the configured thresholds
#[derive(Debug, Clone, PartialEq)]
pub enum HealthVerdict {
    Healthy,
    Unhealthy(String),
}

/// What the caller has to do after a verdict was folded into a record
#[derive(Debug, Clone, PartialEq)]
pub enum HealthAction {
    /// Healthy and was healthy before
    None,
    /// First unhealthy observation; the timer started
    BecameUnhealthy,
    /// Unhealthy, but not for long enough yet
    StillUnhealthy { for_secs: i64 },
    /// Unhealthy past the threshold; the process must be killed
    Kill { for_secs: i64 },
    /// Healthy again after an unhealthy spell
    Recovered,
}

/// Evaluate a sample. Memory wins over CPU ceiling, which wins over CPU floor;
/// a threshold of 0 disables its check.
pub fn evaluate(config: &HealthCheckConfig, sample: &ResourceSample) -> HealthVerdict {
    if config.max_memory_mb > 0.0 && sample.memory_mb > config.max_memory_mb {
        return HealthVerdict::Unhealthy(format!(
            "Memory {:.1}MB exceeds limit {}MB",
            sample.memory_mb, config.max_memory_mb
        ));
    }

    if config.max_cpu_percent > 0.0 && sample.cpu_percent > config.max_cpu_percent {
        return HealthVerdict::Unhealthy(format!(
            "CPU {:.1}% exceeds limit {}%",
            sample.cpu_percent, config.max_cpu_percent
        ));
    }

    if config.min_cpu_percent > 0.0 && sample.cpu_percent < config.min_cpu_percent {
        return HealthVerdict::Unhealthy(format!(
            "CPU {:.1}% below minimum {}% (hung?)",
            sample.cpu_percent, config.min_cpu_percent
        ));
    }

    HealthVerdict::Healthy
}

/// Whether a health sample is due for this record at `now`
pub fn is_check_due(record: &ManagedProcess, now: DateTime<Utc>) -> bool {
    let config = &record.spec.health_check;
    if !config.enabled {
        return false;
    }

    match record.last_health_check {
        Some(last) => (now - last).num_seconds() >= saturating_secs(config.interval_secs),
        None => true,
    }
}

fn saturating_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Fold a verdict into the record's unhealthy timer
pub fn observe(
    record: &mut ManagedProcess,
    verdict: &HealthVerdict,
    now: DateTime<Utc>,
) -> HealthAction {
    match verdict {
        HealthVerdict::Unhealthy(_) => match record.first_unhealthy_time {
            None => {
                record.first_unhealthy_time = Some(now);
                HealthAction::BecameUnhealthy
            }
            Some(since) => {
                let for_secs = (now - since).num_seconds();
                if for_secs >= saturating_secs(record.spec.health_check.unhealthy_threshold_secs) {
                    record.first_unhealthy_time = None;
                    HealthAction::Kill { for_secs }
                } else {
                    HealthAction::StillUnhealthy { for_secs }
                }
            }
        },
        HealthVerdict::Healthy => {
            if record.first_unhealthy_time.take().is_some() {
                HealthAction::Recovered
            } else {
                HealthAction::None
            }
        }
    }
}
