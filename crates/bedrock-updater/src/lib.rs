//! Bedrock Updater
//!
//! Keeps a long-running Bedrock dedicated server on its latest release. The
//! crate polls the official download page, downloads newer builds and
//! installs them when the configured policy allows, without interrupting a
//! running backup.
//!
//! The server process itself is owned by a supervisor implementing
//! [`ServerProcess`]; the updater only reacts to the events it publishes.

pub mod backup;
pub mod config;
pub mod console;
pub mod error;
pub mod idle;
pub mod installer;
pub mod manager;
pub mod orchestrator;
pub mod process;
pub mod scheduler;
pub mod signal;
pub mod source;
pub mod version;

#[cfg(test)]
mod testing;

pub use backup::BackupGate;
pub use config::{InstallationMode, UpdateConfig};
pub use console::ConsoleEvent;
pub use error::{ErrorKind, UpdateError, UpdateResult};
pub use idle::IdleTracker;
pub use installer::{InstallError, InstallReport, Installer};
pub use manager::UpdateManager;
pub use orchestrator::Orchestrator;
pub use process::{ProcessError, ServerEvent, ServerProcess};
pub use scheduler::InstallScheduler;
pub use source::{DownloadedUpdate, Platform, Release, VersionSource};
pub use version::{CurrentVersion, ParseVersionError, Version};
