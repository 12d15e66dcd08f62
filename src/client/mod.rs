//! Client Module
//!
//! Provides client-side IPC communication with the daemon.
//! CLI commands use this module to send requests and receive responses.

pub mod connection;

pub use connection::DaemonClient;

use std::time::Duration;

use thiserror::Error;

use crate::daemon::protocol::ProtocolError;

/// Errors that can occur when communicating with the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon is not running. Start it with: docindex server")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("No reply from daemon within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
