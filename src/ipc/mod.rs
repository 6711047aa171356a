// IPC module - Communication between CLI and daemon

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{Command, ProcessRef, Request, Response, ResponseData};
pub use server::IpcServer;
