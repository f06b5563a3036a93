//! Install scheduling
//!
//! Decides when a downloaded build gets handed to the [`Installer`]:
//!
//! - `immediate`: warn players, wait one minute, install.
//! - `scheduled`: announce the restart time, wait until one minute before
//!   it, warn again, wait the last minute, install.
//! - `idle`: announce, wait until nobody is connected, install.
//!
//! Every wait ends early with [`UpdateError::Cancelled`] on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;

use crate::config::{parse_time_of_day, InstallationMode};
use crate::error::UpdateResult;
use crate::idle::IdleTracker;
use crate::installer::{InstallReport, Installer};
use crate::process::ServerProcess;
use crate::signal::sleep_or_cancel;
use crate::source::DownloadedUpdate;
use crate::version::Version;

/// Players always get this much notice before a restart.
pub const FINAL_WARNING: Duration = Duration::from_secs(60);

/// The next time-of-day install instant that still leaves room for the
/// final warning. If `time` today is less than [`FINAL_WARNING`] away (or
/// already past), the same time tomorrow is used.
pub fn next_install_at(now: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let warning = chrono::Duration::seconds(FINAL_WARNING.as_secs() as i64);
    let today = now.date().and_time(time);
    if today - warning <= now {
        today + chrono::Duration::days(1)
    } else {
        today
    }
}

/// Local wall-clock time, as used for the daily install slot.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Waits for the moment the installation mode allows, warning players on
/// the way, then runs the [`Installer`].
pub struct InstallScheduler {
    process: Arc<dyn ServerProcess>,
    idle: Arc<IdleTracker>,
    installer: Installer,
    installation_time: String,
    clock: Clock,
}

impl InstallScheduler {
    /// `installation_time` is only parsed when a scheduled install runs, so
    /// a bad value fails that cycle instead of construction.
    pub fn new(
        process: Arc<dyn ServerProcess>,
        idle: Arc<IdleTracker>,
        installer: Installer,
        installation_time: impl Into<String>,
    ) -> Self {
        Self {
            process,
            idle,
            installer,
            installation_time: installation_time.into(),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock used by the scheduled mode.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Wait according to `mode`, then install `update`.
    pub async fn schedule_install(
        &self,
        mode: InstallationMode,
        update: &DownloadedUpdate,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        tracing::info!(mode = %mode, version = %update.version, "Scheduling server update");
        match mode {
            InstallationMode::Immediate => self.install_immediately(update, cancel).await,
            InstallationMode::Scheduled => self.install_at_time_of_day(update, cancel).await,
            InstallationMode::Idle => self.install_when_idle(update, cancel).await,
        }
    }

    async fn install_immediately(
        &self,
        update: &DownloadedUpdate,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        self.final_countdown(&update.version, cancel).await?;
        self.install(update, cancel).await
    }

    async fn install_at_time_of_day(
        &self,
        update: &DownloadedUpdate,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        let time = parse_time_of_day(&self.installation_time)?;
        let now = (self.clock)();
        let install_at = next_install_at(now, time);
        let warn_at = install_at - chrono::Duration::seconds(FINAL_WARNING.as_secs() as i64);

        self.announce(&format!(
            "A new server version ({}) will be installed at {}. The server will restart then.",
            update.version,
            install_at.format("%H:%M")
        ))
        .await;
        tracing::info!(install_at = %install_at, "Server update scheduled");

        let until_warning = (warn_at - now).to_std().unwrap_or_default();
        sleep_or_cancel(until_warning, cancel).await?;

        self.final_countdown(&update.version, cancel).await?;
        self.install(update, cancel).await
    }

    async fn install_when_idle(
        &self,
        update: &DownloadedUpdate,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        self.announce(&format!(
            "A new server version ({}) is available and will be installed once all players have left.",
            update.version
        ))
        .await;

        if !self.idle.is_idle() {
            tracing::info!(
                players = self.idle.player_count(),
                "Waiting for the server to become idle"
            );
        }
        self.idle.wait_idle(cancel).await?;
        self.install(update, cancel).await
    }

    async fn final_countdown(
        &self,
        version: &Version,
        cancel: &CancellationToken,
    ) -> UpdateResult<()> {
        self.announce(&format!(
            "The server will restart in {} seconds to install version {}.",
            FINAL_WARNING.as_secs(),
            version
        ))
        .await;
        sleep_or_cancel(FINAL_WARNING, cancel).await
    }

    async fn install(
        &self,
        update: &DownloadedUpdate,
        cancel: &CancellationToken,
    ) -> UpdateResult<InstallReport> {
        self.installer
            .install(&update.version, update.archive_path(), cancel)
            .await
    }

    // Broadcast failures (e.g. server already down) never block an install.
    async fn announce(&self, message: &str) {
        if let Err(e) = self.process.broadcast(message).await {
            tracing::warn!(error = %e, "Failed to broadcast update notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupGate;
    use crate::testing::{write_zip, FakeServer};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use test_case::test_case;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn next_day(h: u32, m: u32, s: u32) -> NaiveDateTime {
        at(h, m, s) + chrono::Duration::days(1)
    }

    #[test_case(at(1, 0, 0), at(4, 0, 0) ; "earlier today")]
    #[test_case(at(3, 58, 59), at(4, 0, 0) ; "just over a minute before")]
    #[test_case(at(3, 59, 0), next_day(4, 0, 0) ; "exactly one minute before")]
    #[test_case(at(3, 59, 30), next_day(4, 0, 0) ; "inside the final minute")]
    #[test_case(at(4, 0, 30), next_day(4, 0, 0) ; "just after")]
    #[test_case(at(23, 0, 0), next_day(4, 0, 0) ; "late evening")]
    fn test_next_install_at(now: NaiveDateTime, expected: NaiveDateTime) {
        let time = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
        assert_eq!(next_install_at(now, time), expected);
    }

    #[test]
    fn test_pre_warning_is_a_full_minute_before_install() {
        let now = at(4, 0, 30);
        let install_at = next_install_at(now, NaiveTime::from_hms_opt(4, 0, 0).unwrap());
        let warn_at = install_at - chrono::Duration::seconds(60);
        assert_eq!(warn_at, next_day(3, 59, 0));
        assert!(warn_at > now);
    }

    struct Fixture {
        _scratch: TempDir,
        dest: TempDir,
        server: Arc<FakeServer>,
        idle: Arc<IdleTracker>,
        scheduler: Arc<InstallScheduler>,
        update: Arc<DownloadedUpdate>,
    }

    fn fixture(installation_time: &str) -> Fixture {
        fixture_at(installation_time, None)
    }

    fn fixture_at(installation_time: &str, now: Option<NaiveDateTime>) -> Fixture {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let server = Arc::new(FakeServer::running());
        let idle = Arc::new(IdleTracker::new());

        let archive = tempfile::Builder::new()
            .suffix(".zip")
            .tempfile_in(scratch.path())
            .unwrap()
            .into_temp_path();
        write_zip(&archive, &[("bedrock_server", "new binary")]);

        let installer = Installer::new(
            server.clone(),
            Arc::new(BackupGate::new()),
            dest.path(),
            BTreeSet::new(),
        );
        let mut scheduler =
            InstallScheduler::new(server.clone(), idle.clone(), installer, installation_time);
        if let Some(now) = now {
            scheduler = scheduler.with_clock(move || now);
        }
        let scheduler = Arc::new(scheduler);
        let update = Arc::new(DownloadedUpdate {
            version: "1.20.1.0".parse().unwrap(),
            archive,
        });

        Fixture {
            _scratch: scratch,
            dest,
            server,
            idle,
            scheduler,
            update,
        }
    }

    fn spawn_schedule(
        f: &Fixture,
        mode: InstallationMode,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<UpdateResult<InstallReport>> {
        let scheduler = f.scheduler.clone();
        let update = f.update.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.schedule_install(mode, &update, &cancel).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_waits_one_minute() {
        let f = fixture("04:00");
        let task = spawn_schedule(&f, InstallationMode::Immediate, &CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!task.is_finished());
        assert_eq!(f.server.broadcasts().len(), 1);
        assert!(f.server.broadcasts()[0].contains("60 seconds"));

        task.await.unwrap().unwrap();
        assert_eq!(f.server.start_count(), 1);
        assert!(f.dest.path().join("bedrock_server").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_warns_twice_then_installs() {
        let f = fixture("04:00");
        let task = spawn_schedule(&f, InstallationMode::Scheduled, &CancellationToken::new());

        task.await.unwrap().unwrap();
        let broadcasts = f.server.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        assert!(broadcasts[0].contains("will be installed at"));
        assert!(broadcasts[1].contains("60 seconds"));
        assert_eq!(f.server.start_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_final_warning_one_minute_before_slot() {
        // 04:00 has just passed, so the slot is 04:00 tomorrow and the final
        // warning is due at 03:59:00 tomorrow, 23h58m30s from now.
        let f = fixture_at("04:00", Some(at(4, 0, 30)));
        let task = spawn_schedule(&f, InstallationMode::Scheduled, &CancellationToken::new());

        let until_warning = Duration::from_secs(23 * 3600 + 58 * 60 + 30);
        tokio::time::sleep(until_warning - Duration::from_secs(1)).await;
        let broadcasts = f.server.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert!(broadcasts[0].contains("installed at 04:00"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let broadcasts = f.server.broadcasts();
        assert_eq!(broadcasts.len(), 2);
        assert!(broadcasts[1].contains("60 seconds"));
        assert_eq!(f.server.start_count(), 0);

        tokio::time::sleep(Duration::from_secs(58)).await;
        assert!(!task.is_finished());
        assert!(!f.server.commands().iter().any(|c| c == "stop"));

        task.await.unwrap().unwrap();
        assert_eq!(f.server.start_count(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_with_invalid_time_fails() {
        let f = fixture("whenever");
        let err = f
            .scheduler
            .schedule_install(
                InstallationMode::Scheduled,
                &f.update,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::UpdateError::Config(_)));
        assert!(f.server.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_last_player() {
        let f = fixture("04:00");
        f.idle.on_player_connected();
        let task = spawn_schedule(&f, InstallationMode::Idle, &CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!task.is_finished());
        assert_eq!(f.server.broadcasts().len(), 1);
        assert_eq!(f.server.start_count(), 0);

        f.idle.on_player_disconnected();
        task.await.unwrap().unwrap();
        assert_eq!(f.server.start_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_without_installing() {
        let f = fixture("04:00");
        let cancel = CancellationToken::new();
        let task = spawn_schedule(&f, InstallationMode::Immediate, &cancel);

        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(!f.server.commands().iter().any(|c| c == "stop"));
        assert!(!f.dest.path().join("bedrock_server").exists());
    }
}
