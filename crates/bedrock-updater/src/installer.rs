//! Install transaction
//!
//! Stop the server, unpack the new build over the install directory, start
//! the server again. Files whose bare name is in the ignore list (world
//! settings, allow lists, permissions) are never touched.
//!
//! The transaction is not atomic: if extraction fails halfway the install
//! directory is left partially updated and the server stays stopped. That is
//! reported as an [`InstallError`] and needs an operator; nothing retries it.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::backup::BackupGate;
use crate::error::UpdateResult;
use crate::process::{ProcessError, ServerProcess};
use crate::version::Version;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(120);

/// Why an install transaction failed.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to open archive {path:?}: {source}")]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt server archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("server did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("server process error: {0}")]
    Process(#[from] ProcessError),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What an install wrote and what it left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Runs install transactions against one install directory, one at a time.
pub struct Installer {
    process: Arc<dyn ServerProcess>,
    backup_gate: Arc<BackupGate>,
    install_dir: PathBuf,
    ignore_files: Arc<BTreeSet<String>>,
    stop_timeout: Duration,
    // one install at a time
    lock: Mutex<()>,
}

impl Installer {
    /// Files named in `ignore_files` are never written, at any depth.
    pub fn new(
        process: Arc<dyn ServerProcess>,
        backup_gate: Arc<BackupGate>,
        install_dir: impl Into<PathBuf>,
        ignore_files: BTreeSet<String>,
    ) -> Self {
        Self {
            process,
            backup_gate,
            install_dir: install_dir.into(),
            ignore_files: Arc::new(ignore_files),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            lock: Mutex::new(()),
        }
    }

    /// How long the server gets to exit after `stop` (default two minutes).
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Run the stop → extract → start transaction.
    ///
    /// Cancellation is honored only while waiting for the backup gate. Once
    /// the server is being stopped the transaction runs to the end.
    pub async fn install(
        &self,
        version: &Version,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        let _guard = self.lock.lock().await;

        if !self.backup_gate.is_open() {
            tracing::info!("Backup in progress, waiting before installing");
        }
        self.backup_gate.wait_open(cancel).await?;

        tracing::info!(version = %version, dir = ?self.install_dir, "Installing server update");
        Ok(self.run_transaction(archive).await?)
    }

    async fn run_transaction(&self, archive: &Path) -> Result<InstallReport, InstallError> {
        let was_running = self.process.is_running().await;
        if was_running {
            self.stop_server().await?;
        }

        let archive = archive.to_path_buf();
        let install_dir = self.install_dir.clone();
        let ignore_files = Arc::clone(&self.ignore_files);
        let report = tokio::task::spawn_blocking(move || {
            extract_archive(&archive, &install_dir, &ignore_files)
        })
        .await??;

        tracing::info!(
            written = report.written.len(),
            skipped = report.skipped.len(),
            "Extracted server archive"
        );

        if was_running {
            tracing::info!("Restarting server");
            self.process.start().await?;
        }
        Ok(report)
    }

    // The stop request shares the timeout with the exit wait: a console
    // pipe that stops draining must not hang the install.
    async fn stop_server(&self) -> Result<(), InstallError> {
        tracing::info!("Stopping server");
        let stop = async {
            self.process.request_stop().await?;
            self.process.wait_for_exit().await
        };
        match tokio::time::timeout(self.stop_timeout, stop).await {
            Ok(stopped) => stopped?,
            Err(_) => return Err(InstallError::StopTimeout(self.stop_timeout)),
        }
        self.process.release().await;
        Ok(())
    }
}

/// Unpack every file entry of `archive` below `dest`, overwriting existing
/// files. Directory entries, entries without a file name, entries escaping
/// `dest` and ignored names are skipped.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    ignore_files: &BTreeSet<String>,
) -> Result<InstallReport, InstallError> {
    let file = File::open(archive).map_err(|source| InstallError::OpenArchive {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    let mut report = InstallReport::default();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry outside install dir");
            report.skipped.push(PathBuf::from(entry.name()));
            continue;
        };
        let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.is_empty() {
            continue;
        }
        if ignore_files.contains(file_name) {
            tracing::debug!(entry = ?relative, "Keeping ignored file");
            report.skipped.push(relative);
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| InstallError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let write_err = |source: io::Error| InstallError::Write {
            path: target.clone(),
            source,
        };
        let mut out = File::create(&target).map_err(write_err)?;
        io::copy(&mut entry, &mut out).map_err(write_err)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                .map_err(write_err)?;
        }

        report.written.push(relative);
    }

    Ok(report)
}
