use thiserror::Error;

/// Main error type for the procward supervisor
#[derive(Debug, Error)]
pub enum WardError {
    // Process-related errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Process {0} is in invalid state for this operation: {1}")]
    InvalidProcessState(String, String),

    #[error("Ambiguous process reference '{0}' matches more than one process")]
    AmbiguousProcess(String),

    // Health sampling errors
    #[error("Health sample failed for process {0}: {1}")]
    SampleError(String, String),

    // IPC-related errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon already running (PID: {0})")]
    DaemonAlreadyRunning(u32),

    // State store errors
    #[error("State store error: {0}")]
    StateError(String),

    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for procward operations
pub type Result<T> = std::result::Result<T, WardError>;
