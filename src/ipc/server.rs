// IPC Server - Listens for client connections and dispatches requests

use crate::error::{Result, WardError};
use crate::ipc::protocol::{Command, Request, Response, ResponseData};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// IPC server: one newline-terminated JSON request per connection
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
        }
    }

    /// Bind the Unix socket, replacing a stale socket file
    pub fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| WardError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                WardError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        self.listener = Some(listener);
        Ok(())
    }

    /// Accept connections until `cancel` fires; each one is served on its own task
    pub async fn run<F, Fut>(&self, handler: F, cancel: CancellationToken) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send + 'static,
    {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| WardError::IpcError("Server not started".to_string()))?;
        let handler = Arc::new(handler);

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::serve(stream, handler.as_ref()).await {
                    error!("Failed to serve IPC request: {}", e);
                }
            });
        }

        debug!("IPC server stopped accepting connections");
        Ok(())
    }

    async fn serve<F, Fut>(stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<ResponseData>>,
    {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| WardError::IpcError(format!("Failed to read request: {}", e)))?;

        let response = match serde_json::from_str::<Request>(&request_line) {
            Ok(request) => {
                debug!(request_id = request.id, command = ?request.command, "IPC request");
                match handler(request.command).await {
                    Ok(data) => Response::success(request.id, data),
                    Err(e) => Response::error(request.id, e.to_string()),
                }
            }
            Err(e) => Response::error(0, format!("Malformed request: {}", e)),
        };

        let mut response_json = serde_json::to_string(&response).map_err(|e| {
            WardError::SerializationError(format!("Failed to serialize response: {}", e))
        })?;
        response_json.push('\n');

        write_half
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| WardError::IpcError(format!("Failed to write response: {}", e)))?;
        write_half
            .flush()
            .await
            .map_err(|e| WardError::IpcError(format!("Failed to flush stream: {}", e)))?;

        Ok(())
    }

    /// Drop the listener and remove the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                WardError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::client::IpcClient;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_start_sets_owner_only_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("perm.sock");
        let mut server = IpcServer::with_socket_path(&socket_path);

        server.start().unwrap();

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        server.stop().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("drop.sock");
        {
            let mut server = IpcServer::with_socket_path(&socket_path);
            server.start().unwrap();
            assert!(socket_path.exists());
        }
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_request_round_trip_through_client() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("rt.sock");
        let mut server = IpcServer::with_socket_path(&socket_path);
        server.start().unwrap();

        let cancel = CancellationToken::new();
        let server_cancel = cancel.clone();
        let server_task = tokio::spawn(async move {
            server
                .run(
                    |command| async move {
                        match command {
                            Command::Status => Ok(ResponseData::DaemonStatus {
                                pid: 42,
                                uptime_secs: 1,
                                process_count: 0,
                            }),
                            other => Err(WardError::Other(format!("unsupported {:?}", other))),
                        }
                    },
                    server_cancel,
                )
                .await
        });

        let client_path = socket_path.clone();
        let (status, list) = tokio::task::spawn_blocking(move || {
            let client = IpcClient::with_socket_path(&client_path);
            (
                client.send_command(Command::Status).unwrap(),
                client.send_command(Command::List).unwrap(),
            )
        })
        .await
        .unwrap();

        assert!(matches!(
            status.result,
            Ok(ResponseData::DaemonStatus { pid: 42, .. })
        ));
        assert!(list.result.unwrap_err().contains("unsupported"));

        cancel.cancel();
        server_task.await.unwrap().unwrap();
    }
}
