//! Update loop
//!
//! Polls the version source on a fixed interval once the running version is
//! known. A found update goes through the scheduler and the installer; no
//! failure inside a cycle stops the loop, only cancellation does.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::InstallationMode;
use crate::error::{ErrorKind, UpdateResult};
use crate::scheduler::InstallScheduler;
use crate::signal::sleep_or_cancel;
use crate::source::VersionSource;
use crate::version::{CurrentVersion, Version};

/// Drives the periodic check → schedule → install cycle.
pub struct UpdateManager {
    pub(crate) source: VersionSource,
    scheduler: InstallScheduler,
    mode: InstallationMode,
    interval: Duration,
    current_version: CurrentVersion,
}

impl UpdateManager {
    /// `current_version` is shared with whoever reads the server console.
    pub fn new(
        source: VersionSource,
        scheduler: InstallScheduler,
        mode: InstallationMode,
        interval: Duration,
        current_version: CurrentVersion,
    ) -> Self {
        Self {
            source,
            scheduler,
            mode,
            interval,
            current_version,
        }
    }

    pub fn mode(&self) -> InstallationMode {
        self.mode
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `cancel` fires. Does nothing until the running server has
    /// reported its version.
    pub async fn run(&self, cancel: &CancellationToken) {
        let Some(version) = self.current_version.wait_known(cancel).await else {
            tracing::debug!("Update loop cancelled before the server version was known");
            return;
        };
        tracing::info!(
            version = %version,
            mode = %self.mode,
            interval = ?self.interval,
            "Starting update loop"
        );

        loop {
            self.run_cycle_logged(cancel).await;
            if sleep_or_cancel(self.interval, cancel).await.is_err() {
                break;
            }
        }
        tracing::info!("Update loop stopped");
    }

    /// Run one cycle and log its failure, if any. Returns the kind that was
    /// logged.
    async fn run_cycle_logged(&self, cancel: &CancellationToken) -> Option<ErrorKind> {
        match AssertUnwindSafe(self.run_cycle(cancel)).catch_unwind().await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                let kind = e.kind();
                match kind {
                    ErrorKind::Cancelled => tracing::debug!("Update cycle cancelled"),
                    ErrorKind::InstallFailure => tracing::error!(
                        error = %e,
                        "Server update failed; the server may be stopped or partially updated \
                         and needs attention"
                    ),
                    kind => tracing::error!(kind = %kind, error = %e, "Update cycle failed"),
                }
                Some(kind)
            }
            Err(panic) => {
                tracing::error!(
                    kind = %ErrorKind::Unexpected,
                    panic = panic_message(panic.as_ref()),
                    "Update cycle panicked"
                );
                Some(ErrorKind::Unexpected)
            }
        }
    }

    /// One check → schedule → install pass. Returns the installed version,
    /// if any.
    ///
    /// The downloaded archive is owned by this call and removed on every
    /// exit path, including cancellation and unwinding.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> UpdateResult<Option<Version>> {
        let Some(current) = self.current_version.get() else {
            return Ok(None);
        };
        let Some(update) = self.source.check_for_update(&current, cancel).await else {
            return Ok(None);
        };

        let report = self
            .scheduler
            .schedule_install(self.mode, &update, cancel)
            .await?;
        tracing::info!(
            from = %current,
            to = %update.version,
            files = report.written.len(),
            "Server updated"
        );

        // The restarted server announces its version again, but a server
        // that was not running when we installed would not.
        self.current_version.set(update.version);
        Ok(Some(update.version))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
