//! Backup gate
//!
//! Open except while the backup subsystem reports a backup in progress.
//! The installer only waits on it; it never holds it, so a backup can start
//! at any time.

use tokio_util::sync::CancellationToken;

use crate::error::UpdateResult;
use crate::signal::LevelSignal;

/// Closed while a world backup is running; installs wait for it to open.
#[derive(Debug)]
pub struct BackupGate {
    open: LevelSignal,
}

impl BackupGate {
    /// Starts open: no backup running.
    pub fn new() -> Self {
        Self {
            open: LevelSignal::new(true),
        }
    }

    pub fn on_backup_begin(&self) {
        tracing::debug!("Backup started, install gate closed");
        self.open.clear();
    }

    pub fn on_backup_end(&self) {
        tracing::debug!("Backup finished, install gate open");
        self.open.set();
    }

    pub fn is_open(&self) -> bool {
        self.open.is_set()
    }

    pub async fn wait_open(&self, cancel: &CancellationToken) -> UpdateResult<()> {
        self.open.wait(cancel).await
    }
}

impl Default for BackupGate {
    fn default() -> Self {
        Self::new()
    }
}
