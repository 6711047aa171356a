// IPC Client - Talks to the daemon over its Unix socket

use crate::error::{Result, WardError};
use crate::ipc::protocol::{Command, Request, Response};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum number of connection attempts
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Delay between connection attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Blocking IPC client used by the CLI
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            request_id: AtomicU64::new(1),
        }
    }

    /// Send a command and wait for the daemon's response.
    ///
    /// Only the connection is retried; a request that reached the daemon is
    /// never sent twice.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(request_id, command);

        let stream = self.connect_with_retry()?;
        let response = Self::exchange(stream, &request)?;

        if response.id != request_id {
            return Err(WardError::ProtocolError(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        Ok(response)
    }

    fn connect_with_retry(&self) -> Result<UnixStream> {
        let mut attempt = 1;
        loop {
            match self.connect() {
                Ok(stream) => return Ok(stream),
                Err(WardError::DaemonNotRunning) => return Err(WardError::DaemonNotRunning),
                Err(e) if attempt >= MAX_CONNECT_ATTEMPTS => return Err(e),
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }

    fn exchange(mut stream: UnixStream, request: &Request) -> Result<Response> {
        let request_json = serde_json::to_string(request).map_err(|e| {
            WardError::SerializationError(format!("Failed to serialize request: {}", e))
        })?;

        writeln!(stream, "{}", request_json)
            .map_err(|e| WardError::IpcError(format!("Failed to write request: {}", e)))?;
        stream
            .flush()
            .map_err(|e| WardError::IpcError(format!("Failed to flush stream: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|e| WardError::IpcError(format!("Failed to read response: {}", e)))?;

        if response_line.trim().is_empty() {
            return Err(WardError::ProtocolError(
                "Daemon closed the connection without a response".to_string(),
            ));
        }

        serde_json::from_str(&response_line).map_err(|e| {
            WardError::DeserializationError(format!("Failed to deserialize response: {}", e))
        })
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(WardError::DaemonNotRunning);
        }

        UnixStream::connect(&self.socket_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                WardError::DaemonNotRunning
            }
            _ => WardError::ConnectionError(format!("Failed to connect to daemon: {}", e)),
        })
    }
}
