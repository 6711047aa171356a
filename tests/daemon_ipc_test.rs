// End-to-end tests: a daemon instance driven through the Unix socket client

use procward::config::{DaemonConfig, ProcessSpec};
use procward::daemon::Daemon;
use procward::error::WardError;
use procward::ipc::{Command, IpcClient, Response, ResponseData};
use procward::process::ManualOutcome;
use procward::state::StateStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn config_in(dir: &Path) -> DaemonConfig {
    DaemonConfig {
        state_path: dir.join("state.json"),
        socket_path: dir.join("procward.sock"),
        pid_path: dir.join("procward.pid"),
        tick_interval_ms: 100,
        sample_window_ms: 100,
        kill_timeout_secs: 2,
        ..DaemonConfig::default()
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon socket never appeared at {}", path.display());
}

/// Run blocking client calls off the runtime threads
async fn send(socket: &Path, command: Command) -> Response {
    let socket: PathBuf = socket.to_path_buf();
    tokio::task::spawn_blocking(move || {
        IpcClient::with_socket_path(&socket)
            .send_command(command)
            .unwrap()
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_daemon_serves_commands_and_cleans_up() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_in(temp_dir.path());
    let socket = config.socket_path.clone();
    let pid_path = config.pid_path.clone();
    let state_path = config.state_path.clone();

    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(Daemon::new(config).run(shutdown.clone()));
    wait_for_socket(&socket).await;
    assert!(pid_path.exists());

    let mut spec = ProcessSpec::new("sleeper", "/bin/sleep");
    spec.parameters = "30".to_string();
    let added = send(&socket, Command::Add(spec)).await;
    let Ok(ResponseData::Added { id, .. }) = added.result else {
        panic!("add failed: {:?}", added.result);
    };

    // Give the supervisor a couple of ticks to start it
    tokio::time::sleep(Duration::from_millis(400)).await;

    let listed = send(&socket, Command::List).await;
    let Ok(ResponseData::ProcessList(views)) = listed.result else {
        panic!("list failed: {:?}", listed.result);
    };
    assert_eq!(views.len(), 1);
    assert!(views[0].is_running);
    assert_eq!(views[0].restart_count, 0);
    let pid = views[0].pid.unwrap();

    let status = send(&socket, Command::Status).await;
    assert!(matches!(
        status.result,
        Ok(ResponseData::DaemonStatus { process_count: 1, .. })
    ));

    shutdown.cancel();
    daemon.await.unwrap().unwrap();

    assert!(!socket.exists());
    assert!(!pid_path.exists());
    assert!(!procward::process::controller::pid_exists(pid));

    let state = StateStore::new(&state_path).load().unwrap();
    assert_eq!(state.processes.len(), 1);
    assert_eq!(state.processes[0].id, id);
}

#[tokio::test]
async fn test_manual_commands_by_name() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_in(temp_dir.path());
    let socket = config.socket_path.clone();

    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(Daemon::new(config).run(shutdown.clone()));
    wait_for_socket(&socket).await;

    let mut spec = ProcessSpec::new("manual", "/bin/sleep");
    spec.parameters = "30".to_string();
    spec.auto_restart = false;
    send(&socket, Command::Add(spec)).await.result.unwrap();

    let started = send(&socket, Command::Start("manual".to_string())).await;
    assert!(matches!(
        started.result,
        Ok(ResponseData::Started {
            outcome: ManualOutcome::Started { .. },
            ..
        })
    ));

    let again = send(&socket, Command::Start("manual".to_string())).await;
    assert!(matches!(
        again.result,
        Ok(ResponseData::Started {
            outcome: ManualOutcome::AlreadyRunning,
            ..
        })
    ));

    let stopped = send(&socket, Command::Stop("manual".to_string())).await;
    assert!(matches!(
        stopped.result,
        Ok(ResponseData::Stopped {
            outcome: ManualOutcome::Stopped,
            ..
        })
    ));

    let missing = send(&socket, Command::Remove("nope".to_string())).await;
    assert!(missing.result.unwrap_err().contains("nope"));

    let removed = send(&socket, Command::Remove("manual".to_string())).await;
    assert!(matches!(removed.result, Ok(ResponseData::Removed { .. })));

    shutdown.cancel();
    daemon.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_invalid_spec_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_in(temp_dir.path());
    let socket = config.socket_path.clone();

    let shutdown = CancellationToken::new();
    let daemon = tokio::spawn(Daemon::new(config).run(shutdown.clone()));
    wait_for_socket(&socket).await;

    let mut spec = ProcessSpec::new("broken", "/bin/sleep");
    spec.max_restart_attempts = 0;
    let response = send(&socket, Command::Add(spec)).await;
    assert!(response.result.is_err());

    let listed = send(&socket, Command::List).await;
    assert!(matches!(listed.result, Ok(ResponseData::ProcessList(ref v)) if v.is_empty()));

    shutdown.cancel();
    daemon.await.unwrap().unwrap();
}

#[test]
fn test_client_reports_missing_daemon() {
    let temp_dir = TempDir::new().unwrap();
    let client = IpcClient::with_socket_path(temp_dir.path().join("absent.sock"));

    assert!(matches!(
        client.send_command(Command::Status),
        Err(WardError::DaemonNotRunning)
    ));
}
