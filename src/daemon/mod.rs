// Daemon module - Hosts the supervisor and the control socket

pub mod pid;

pub use pid::PidFile;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::ipc::protocol::{Command, ResponseData};
use crate::ipc::server::IpcServer;
use crate::process::{
    ProcessController, ProcessRegistry, ProcessService, Supervisor, SupervisorConfig,
};
use crate::state::StateStore;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything one daemon instance owns
pub struct Daemon {
    config: DaemonConfig,
    service: Arc<ProcessService>,
    started_at: Instant,
}

impl Daemon {
    /// Build the daemon, restoring processes from the configured state file
    pub fn new(config: DaemonConfig) -> Self {
        let controller = ProcessController::new(config.kill_timeout());
        let registry = Arc::new(ProcessRegistry::load(
            controller,
            StateStore::new(&config.state_path),
        ));
        let service = Arc::new(ProcessService::new(registry, config.suppression_window()));

        Self {
            config,
            service,
            started_at: Instant::now(),
        }
    }

    pub fn service(&self) -> &Arc<ProcessService> {
        &self.service
    }

    pub async fn handle_command(&self, command: Command) -> Result<ResponseData> {
        dispatch(&self.service, self.started_at, command).await
    }

    /// Serve until `shutdown` fires, then kill every child and save state.
    ///
    /// Refuses to start when another live daemon owns the pid file.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let pid_file = PidFile::with_path(&self.config.pid_path);
        pid_file.acquire()?;
        info!(pid = std::process::id(), path = %pid_file.path().display(), "Daemon registered");

        let result = self.serve(shutdown).await;

        if let Err(e) = pid_file.remove() {
            warn!("Failed to remove PID file: {}", e);
        }
        result
    }

    async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let mut server = IpcServer::with_socket_path(&self.config.socket_path);
        server.start()?;
        info!(socket = %server.socket_path().display(), "Listening for commands");

        let supervisor = Supervisor::new(
            Arc::clone(self.service.registry()),
            SupervisorConfig::from(&self.config),
        );
        let supervisor_task = tokio::spawn(supervisor.run(shutdown.clone()));

        let service = Arc::clone(&self.service);
        let started_at = self.started_at;
        let served = server
            .run(
                move |command| {
                    let service = Arc::clone(&service);
                    async move { dispatch(&service, started_at, command).await }
                },
                shutdown.clone(),
            )
            .await;

        // The server only returns early on error; stop the supervisor either way
        shutdown.cancel();
        info!("Shutting down");

        if let Err(e) = supervisor_task.await {
            error!("Supervisor task failed: {}", e);
        }

        if let Err(e) = self.service.registry().persist().await {
            error!("Failed to save state on shutdown: {}", e);
        }

        server.stop()?;
        info!("Daemon stopped");
        served
    }
}

/// Execute one control command against the service
pub async fn dispatch(
    service: &ProcessService,
    started_at: Instant,
    command: Command,
) -> Result<ResponseData> {
    let registry = service.registry();

    match command {
        Command::Add(spec) => {
            let name = spec.name.clone();
            let id = service.add_process(spec).await?;
            Ok(ResponseData::Added { id, name })
        }
        Command::Remove(reference) => {
            let id = registry.resolve(&reference).await?;
            service.remove_process(id).await?;
            Ok(ResponseData::Removed { id })
        }
        Command::List => Ok(ResponseData::ProcessList(service.list_processes().await)),
        Command::Start(reference) => {
            let id = registry.resolve(&reference).await?;
            let outcome = service.manual_start(id).await?;
            Ok(ResponseData::Started { id, outcome })
        }
        Command::Stop(reference) => {
            let id = registry.resolve(&reference).await?;
            let outcome = service.manual_stop(id).await?;
            Ok(ResponseData::Stopped { id, outcome })
        }
        Command::Status => Ok(ResponseData::DaemonStatus {
            pid: std::process::id(),
            uptime_secs: started_at.elapsed().as_secs(),
            process_count: registry.len().await,
        }),
    }
}
