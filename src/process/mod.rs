// Process module - Supervision core

pub mod controller;
pub mod monitor;
pub mod registry;
pub mod restart;
pub mod service;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use controller::ProcessController;
pub use registry::{ProcessRegistry, SharedRecord};
pub use restart::CircuitBreaker;
pub use service::{ManualOutcome, ProcessService};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::{ManagedProcess, ProcessId, ProcessView, ResourceSample, RunState};
