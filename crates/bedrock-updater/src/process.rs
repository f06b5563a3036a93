//! Server process supervisor interface
//!
//! The updater does not own the server process. Whatever does (the CLI host,
//! a plugin host, a test double) implements [`ServerProcess`] and publishes
//! the console output and exit notifications as [`ServerEvent`]s.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Console command that shuts the server down gracefully.
pub const STOP_COMMAND: &str = "stop";

/// Failure of a supervisor operation.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("server process is not running")]
    NotRunning,

    #[error("server process is already running")]
    AlreadyRunning,

    #[error("server process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Something the supervisor observed on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// One line of console output, without the trailing newline.
    Line(String),
    /// The server process exited.
    Exited,
}

#[async_trait]
pub trait ServerProcess: Send + Sync {
    async fn is_running(&self) -> bool;

    /// Write one line to the server console.
    async fn send_command(&self, command: &str) -> Result<(), ProcessError>;

    /// Resolve once the process has exited. Returns immediately if it is
    /// not running.
    async fn wait_for_exit(&self) -> Result<(), ProcessError>;

    /// Drop pipes and handles left over from an exited process.
    async fn release(&self);

    async fn start(&self) -> Result<(), ProcessError>;

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;

    /// Show a message to every connected player.
    async fn broadcast(&self, message: &str) -> Result<(), ProcessError> {
        self.send_command(&format!("say {}", message)).await
    }

    async fn request_stop(&self) -> Result<(), ProcessError> {
        self.send_command(STOP_COMMAND).await
    }
}
