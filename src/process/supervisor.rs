use crate::config::DaemonConfig;
use crate::error::Result;
use crate::process::monitor::{self, HealthAction, HealthSampler, HealthVerdict};
use crate::process::registry::{ProcessRegistry, SharedRecord};
use crate::process::restart::{self, CircuitBreaker};
use crate::process::types::ProcessId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervisor configuration
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Period of the supervision tick
    pub tick_interval: Duration,
    /// Length of one CPU sampling window
    pub sample_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            sample_window: Duration::from_millis(500),
        }
    }
}

impl From<&DaemonConfig> for SupervisorConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            sample_window: config.sample_window(),
        }
    }
}

/// Periodic supervision of every registered process.
///
/// Each tick spawns one task per record that has no task in flight yet, so a
/// restart delay or a health sample on one record never holds up the others.
pub struct Supervisor {
    registry: Arc<ProcessRegistry>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(registry: Arc<ProcessRegistry>, config: SupervisorConfig) -> Self {
        Self { registry, config }
    }

    /// Run the supervision loop until `cancel` fires, then kill every live
    /// process before returning
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Starting process supervisor (tick interval: {:?})",
            self.config.tick_interval
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: HashMap<ProcessId, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&mut in_flight, &cancel).await;
                }
            }
        }

        info!("Supervisor stopping, waiting for in-flight work");
        for (_, handle) in in_flight.drain() {
            if let Err(e) = handle.await {
                error!("Supervision task failed: {}", e);
            }
        }

        self.shutdown().await;
    }

    /// Spawn a supervision step for every record without one in flight
    async fn tick(
        &self,
        in_flight: &mut HashMap<ProcessId, JoinHandle<()>>,
        cancel: &CancellationToken,
    ) {
        in_flight.retain(|_, handle| !handle.is_finished());

        for (id, record) in self.registry.snapshot().await {
            if in_flight.contains_key(&id) {
                debug!(%id, "Previous supervision step still running");
                continue;
            }

            let registry = Arc::clone(&self.registry);
            let config = self.config;
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                supervise_logged(registry, id, record, config, cancel).await;
            });
            in_flight.insert(id, handle);
        }
    }

    /// One full pass over every record, waiting for all steps to finish
    pub async fn pass(&self, cancel: &CancellationToken) {
        let mut steps = JoinSet::new();

        for (id, record) in self.registry.snapshot().await {
            let registry = Arc::clone(&self.registry);
            let config = self.config;
            let cancel = cancel.clone();
            steps.spawn(async move {
                supervise_logged(registry, id, record, config, cancel).await;
            });
        }

        while let Some(result) = steps.join_next().await {
            if let Err(e) = result {
                error!("Supervision task failed: {}", e);
            }
        }
    }

    /// Kill every live process; best effort, no retries
    pub async fn shutdown(&self) {
        let records = self.registry.snapshot().await;
        info!(count = records.len(), "Killing supervised processes");

        for (_, record) in records {
            let mut record = record.lock().await;
            if record.is_running() {
                info!(name = %record.name(), pid = ?record.pid(), "Stopping process for shutdown");
                self.registry.controller().kill(&mut record).await;
            }
        }
    }
}

async fn supervise_logged(
    registry: Arc<ProcessRegistry>,
    id: ProcessId,
    record: SharedRecord,
    config: SupervisorConfig,
    cancel: CancellationToken,
) {
    if let Err(e) = supervise(&registry, id, &record, config, &cancel).await {
        error!(%id, "Supervision step failed: {}", e);
    }
}

/// Evaluate one record: sample health while it runs, restart it per policy
/// once it is gone
async fn supervise(
    registry: &ProcessRegistry,
    id: ProcessId,
    record: &SharedRecord,
    config: SupervisorConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let now = Utc::now();
    let mut guard = record.lock().await;

    CircuitBreaker::from_spec(&guard.spec).prune(&mut guard.recent_restarts, now);

    guard.refresh_exit();

    if let Some(pid) = guard.pid() {
        if !monitor::is_check_due(&guard, now) {
            return Ok(());
        }
        drop(guard);
        return check_health(registry, record, pid, config, cancel).await;
    }

    if !guard.wants_auto_restart(now) {
        return Ok(());
    }

    if restart::should_trip(&mut guard, now) {
        restart::trip(&mut guard);
        error!(
            name = %guard.name(),
            attempts = guard.spec.max_restart_attempts,
            window_minutes = guard.spec.restart_window_minutes,
            "Circuit breaker tripped, automatic restarts disabled"
        );
        drop(guard);
        registry.persist().await?;
        return Ok(());
    }

    if !guard.is_first_start {
        let delay = guard.spec.restart_delay();
        info!(name = %guard.name(), "Restarting in {:?}", delay);
        drop(guard);

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }

        guard = record.lock().await;
        let now = Utc::now();
        if guard.is_running() || !guard.wants_auto_restart(now) || !registry.contains(id).await {
            debug!(name = %guard.name(), "Restart no longer wanted after delay");
            return Ok(());
        }
    }

    let now = Utc::now();
    let pid = registry.controller().start(&mut guard, now)?;
    restart::record_start(&mut guard, now);
    info!(
        name = %guard.name(),
        pid,
        restart_count = guard.restart_count,
        "Process started"
    );

    Ok(())
}

/// Sample a running process and act on the verdict
async fn check_health(
    registry: &ProcessRegistry,
    record: &SharedRecord,
    pid: u32,
    config: SupervisorConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut sampler = HealthSampler::new(config.sample_window);
    let sample = match sampler.sample(pid, cancel).await {
        Ok(Some(sample)) => sample,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(pid, "Skipping health check: {}", e);
            return Ok(());
        }
    };

    let mut guard = record.lock().await;
    if guard.pid() != Some(pid) {
        // Killed or restarted while sampling
        return Ok(());
    }

    let now = Utc::now();
    guard.last_health_check = Some(now);
    guard.last_sample = Some(sample);

    let verdict = monitor::evaluate(&guard.spec.health_check, &sample);
    let reason = match &verdict {
        HealthVerdict::Unhealthy(reason) => reason.clone(),
        HealthVerdict::Healthy => String::new(),
    };

    match monitor::observe(&mut guard, &verdict, now) {
        HealthAction::None => {}
        HealthAction::BecameUnhealthy => {
            warn!(name = %guard.name(), pid, "Process unhealthy: {}", reason);
        }
        HealthAction::StillUnhealthy { for_secs } => {
            debug!(name = %guard.name(), pid, for_secs, "Process still unhealthy: {}", reason);
        }
        HealthAction::Kill { for_secs } => {
            warn!(
                name = %guard.name(),
                pid,
                for_secs,
                "Process unhealthy past threshold, killing: {}",
                reason
            );
            registry.controller().kill(&mut guard).await;
        }
        HealthAction::Recovered => {
            info!(name = %guard.name(), pid, "Process recovered");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessSpec;
    use crate::process::controller::ProcessController;

    fn supervisor() -> (Supervisor, Arc<ProcessRegistry>) {
        let registry = Arc::new(ProcessRegistry::new(ProcessController::default(), None));
        let config = SupervisorConfig {
            tick_interval: Duration::from_millis(100),
            sample_window: Duration::from_millis(100),
        };
        (Supervisor::new(Arc::clone(&registry), config), registry)
    }

    fn crasher(name: &str) -> ProcessSpec {
        let mut spec = ProcessSpec::new(name, "/bin/sh");
        spec.parameters = r#"-c "exit 1""#.to_string();
        spec.restart_delay_secs = 0;
        spec
    }

    #[tokio::test]
    async fn test_first_pass_starts_without_counting_a_restart() {
        let (supervisor, registry) = supervisor();
        let mut spec = ProcessSpec::new("first", "/bin/sleep");
        spec.parameters = "30".to_string();
        let id = registry.add(spec).await.unwrap();

        supervisor.pass(&CancellationToken::new()).await;

        let record = registry.get(id).await.unwrap();
        {
            let mut record = record.lock().await;
            assert!(record.is_running());
            assert_eq!(record.restart_count, 0);
            assert!(record.recent_restarts.is_empty());
            assert!(!record.is_first_start);
        }

        supervisor.shutdown().await;
        assert!(!record.lock().await.is_running());
    }

    #[tokio::test]
    async fn test_crashed_process_is_restarted() {
        let (supervisor, registry) = supervisor();
        let id = registry.add(crasher("crash")).await.unwrap();
        let cancel = CancellationToken::new();

        supervisor.pass(&cancel).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        supervisor.pass(&cancel).await;

        let record = registry.get(id).await.unwrap();
        let record = record.lock().await;
        assert_eq!(record.restart_count, 1);
        assert_eq!(record.recent_restarts.len(), 1);
    }

    #[tokio::test]
    async fn test_breaker_trips_and_disables_auto_restart() {
        let (supervisor, registry) = supervisor();
        let mut spec = crasher("storm");
        spec.max_restart_attempts = 2;
        let id = registry.add(spec).await.unwrap();
        let cancel = CancellationToken::new();

        // One first start, two restarts, then the breaker opens
        for _ in 0..8 {
            supervisor.pass(&cancel).await;
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        let record = registry.get(id).await.unwrap();
        let record = record.lock().await;
        assert!(record.circuit_breaker_tripped);
        assert!(!record.spec.auto_restart);
        assert_eq!(record.restart_count, 2);
    }

    #[tokio::test]
    async fn test_auto_restart_off_stays_down() {
        let (supervisor, registry) = supervisor();
        let mut spec = crasher("manual-only");
        spec.auto_restart = false;
        let id = registry.add(spec).await.unwrap();

        supervisor.pass(&CancellationToken::new()).await;

        let record = registry.get(id).await.unwrap();
        let record = record.lock().await;
        assert!(record.last_start.is_none());
        assert!(record.is_first_start);
    }

    #[tokio::test]
    async fn test_suppression_window_blocks_restart() {
        let (supervisor, registry) = supervisor();
        let id = registry.add(crasher("quiet")).await.unwrap();

        let record = registry.get(id).await.unwrap();
        record
            .lock()
            .await
            .suppress_auto_restart(Utc::now(), chrono::Duration::seconds(30));

        supervisor.pass(&CancellationToken::new()).await;

        assert!(record.lock().await.last_start.is_none());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_restart_delay() {
        let (supervisor, registry) = supervisor();
        let mut spec = crasher("slow");
        spec.restart_delay_secs = 60;
        let id = registry.add(spec).await.unwrap();
        let cancel = CancellationToken::new();

        supervisor.pass(&cancel).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let waiter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            waiter.cancel();
        });

        let started = std::time::Instant::now();
        supervisor.pass(&cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let record = registry.get(id).await.unwrap();
        assert_eq!(record.lock().await.restart_count, 0);
    }

    #[tokio::test]
    async fn test_run_kills_children_on_cancel() {
        let (supervisor, registry) = supervisor();
        let mut spec = ProcessSpec::new("long", "/bin/sleep");
        spec.parameters = "30".to_string();
        let id = registry.add(spec).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        let record = registry.get(id).await.unwrap();
        let mut pid = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pid = record.lock().await.pid();
            if pid.is_some() {
                break;
            }
        }
        let pid = pid.expect("process should have been started");

        cancel.cancel();
        task.await.unwrap();

        assert!(!record.lock().await.is_running());
        assert!(!crate::process::controller::pid_exists(pid));
    }
}
