// CLI module - User-facing command-line interface

mod output;

use crate::config::{DaemonConfig, HealthCheckConfig, ProcessSpec};
use crate::error::{Result, WardError};
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::{Command, ResponseData};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// procward - keeps a set of external processes running
#[derive(Parser)]
#[command(name = "procward")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Daemon config file (used to locate the control socket)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Control socket path (overrides the config file)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new process with the daemon
    Add(AddArgs),

    /// Register every process defined in a TOML or JSON file
    Import {
        /// Path to the spec file
        file: PathBuf,
    },

    /// Kill (if running) and forget a process
    Remove {
        /// Process id, id prefix or name
        process: String,
    },

    /// List all managed processes
    List {
        /// Print raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start a process now and re-enable automatic restarts
    Start {
        /// Process id, id prefix or name
        process: String,
    },

    /// Stop a process and disable automatic restarts
    Stop {
        /// Process id, id prefix or name
        process: String,
    },

    /// Show daemon status
    Status,
}

#[derive(Args)]
struct AddArgs {
    /// Display name
    name: String,

    /// Path to the executable ($VAR, ${VAR} and %VAR% are expanded at start)
    executable: PathBuf,

    /// Argument string passed to the executable (double quotes group words)
    #[arg(short, long, default_value = "", allow_hyphen_values = true)]
    params: String,

    /// Seconds to wait before an automatic restart
    #[arg(long, default_value_t = 5)]
    restart_delay: u64,

    /// Restarts allowed inside the window before the circuit breaker trips
    #[arg(long, default_value_t = 10)]
    max_restarts: usize,

    /// Length of the restart window in minutes
    #[arg(long, default_value_t = 5)]
    window: u64,

    /// Do not restart the process automatically
    #[arg(long)]
    no_auto_restart: bool,

    /// Enable resource-based health checking
    #[arg(long)]
    health: bool,

    /// Seconds between two health samples
    #[arg(long, default_value_t = 30)]
    health_interval: u64,

    /// Memory ceiling in MB (0 disables)
    #[arg(long, default_value_t = 0.0)]
    max_memory: f64,

    /// CPU ceiling in percent (0 disables)
    #[arg(long, default_value_t = 0.0)]
    max_cpu: f64,

    /// CPU floor in percent, for hung processes (0 disables)
    #[arg(long, default_value_t = 0.0)]
    min_cpu: f64,

    /// Seconds a process may stay unhealthy before it is killed
    #[arg(long, default_value_t = 60)]
    unhealthy_after: u64,
}

impl AddArgs {
    fn into_spec(self) -> ProcessSpec {
        ProcessSpec {
            name: self.name,
            executable: self.executable,
            parameters: self.params,
            restart_delay_secs: self.restart_delay,
            max_restart_attempts: self.max_restarts,
            restart_window_minutes: self.window,
            auto_restart: !self.no_auto_restart,
            health_check: HealthCheckConfig {
                enabled: self.health,
                interval_secs: self.health_interval,
                max_memory_mb: self.max_memory,
                max_cpu_percent: self.max_cpu,
                min_cpu_percent: self.min_cpu,
                unhealthy_threshold_secs: self.unhealthy_after,
            },
        }
    }
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(self) -> Result<()> {
        let client = IpcClient::with_socket_path(self.socket_path()?);

        match self.command {
            Commands::Add(args) => {
                let spec = args.into_spec();
                spec.validate()?;
                send(&client, Command::Add(spec), false)
            }
            Commands::Import { file } => import(&client, &file),
            Commands::Remove { process } => send(&client, Command::Remove(process), true),
            Commands::List { json } => {
                let response = client.send_command(Command::List)?;
                match response.result {
                    Ok(ResponseData::ProcessList(processes)) if json => {
                        let rendered = serde_json::to_string_pretty(&processes).map_err(|e| {
                            WardError::SerializationError(format!(
                                "Failed to render process list: {}",
                                e
                            ))
                        })?;
                        println!("{}", rendered);
                        Ok(())
                    }
                    Ok(data) => {
                        output::print_success(&data);
                        Ok(())
                    }
                    Err(message) => fail(message),
                }
            }
            Commands::Start { process } => send(&client, Command::Start(process), true),
            Commands::Stop { process } => send(&client, Command::Stop(process), true),
            Commands::Status => send(&client, Command::Status, false),
        }
    }

    /// Socket path from `--socket`, else from `--config`, else the default
    fn socket_path(&self) -> Result<PathBuf> {
        if let Some(socket) = &self.socket {
            return Ok(socket.clone());
        }

        let config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };
        Ok(config.socket_path)
    }
}

/// Send one command and print the outcome
fn send(client: &IpcClient, command: Command, slow: bool) -> Result<()> {
    let spinner = slow.then(|| output::create_progress_bar("Waiting for daemon..."));

    let response = match client.send_command(command) {
        Ok(response) => response,
        Err(e) => {
            if let Some(pb) = spinner {
                output::finish_progress_error(pb, "Request failed");
            }
            return Err(e);
        }
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    match response.result {
        Ok(data) => {
            output::print_success(&data);
            Ok(())
        }
        Err(message) => fail(message),
    }
}

/// Register every spec in `file`, reporting each one
fn import(client: &IpcClient, file: &Path) -> Result<()> {
    let specs = ProcessSpec::from_file(file)?;
    let total = specs.len();
    let pb = output::create_progress_bar(&format!("Importing {} process(es)...", total));

    let mut failures = 0;
    for spec in specs {
        let name = spec.name.clone();
        match client.send_command(Command::Add(spec)).map(|r| r.result) {
            Ok(Ok(data)) => pb.println(output::describe(&data)),
            Ok(Err(message)) => {
                failures += 1;
                pb.println(output::describe_error(&format!("{}: {}", name, message)));
            }
            Err(e) => {
                output::finish_progress_error(pb, "Import aborted");
                return Err(e);
            }
        }
    }

    if failures == 0 {
        output::finish_progress_success(pb, &format!("Imported {} process(es)", total));
        Ok(())
    } else {
        output::finish_progress_error(
            pb,
            &format!("{} of {} process(es) rejected", failures, total),
        );
        Err(WardError::Other(format!("{} process(es) rejected", failures)))
    }
}

/// Daemon-side failures carry a message only
fn fail(message: String) -> Result<()> {
    Err(WardError::Other(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_add_arguments_map_to_spec() {
        let cli = Cli::try_parse_from([
            "procward",
            "add",
            "web",
            "/usr/bin/node",
            "--params",
            "server.js --port 8080",
            "--restart-delay",
            "2",
            "--no-auto-restart",
            "--health",
            "--max-memory",
            "512",
        ])
        .unwrap();

        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        let spec = args.into_spec();

        assert_eq!(spec.name, "web");
        assert_eq!(spec.parameters, "server.js --port 8080");
        assert_eq!(spec.restart_delay_secs, 2);
        assert_eq!(spec.max_restart_attempts, 10);
        assert!(!spec.auto_restart);
        assert!(spec.health_check.enabled);
        assert_eq!(spec.health_check.max_memory_mb, 512.0);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_socket_flag_wins_over_default() {
        let cli = Cli::try_parse_from(["procward", "--socket", "/tmp/x.sock", "status"]).unwrap();
        assert_eq!(cli.socket_path().unwrap(), PathBuf::from("/tmp/x.sock"));

        let cli = Cli::try_parse_from(["procward", "list"]).unwrap();
        assert_eq!(
            cli.socket_path().unwrap(),
            DaemonConfig::default().socket_path
        );
    }
}
