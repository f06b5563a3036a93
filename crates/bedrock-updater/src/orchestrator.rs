//! Wiring
//!
//! [`Orchestrator`] owns every component, turns supervisor events into
//! signal updates and drives the update loop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::backup::BackupGate;
use crate::config::{InstallationMode, UpdateConfig};
use crate::console::ConsoleEvent;
use crate::idle::IdleTracker;
use crate::installer::Installer;
use crate::manager::UpdateManager;
use crate::process::{ServerEvent, ServerProcess};
use crate::scheduler::InstallScheduler;
use crate::source::VersionSource;
use crate::version::{CurrentVersion, Version};

/// Every updater component, wired to one server process.
pub struct Orchestrator {
    idle: Arc<IdleTracker>,
    backup_gate: Arc<BackupGate>,
    current_version: CurrentVersion,
    manager: UpdateManager,
}

impl Orchestrator {
    /// Build the components from `config`. Installs go into `install_dir`
    /// and restart `process`.
    pub fn new(
        config: &UpdateConfig,
        install_dir: impl Into<PathBuf>,
        process: Arc<dyn ServerProcess>,
    ) -> Self {
        if config.installation_mode == InstallationMode::Scheduled {
            if let Err(e) = config.installation_time_of_day() {
                tracing::warn!(
                    error = %e,
                    "Scheduled installs will fail until InstallationTime is fixed"
                );
            }
        }

        let idle = Arc::new(IdleTracker::new());
        let backup_gate = Arc::new(BackupGate::new());
        let current_version = CurrentVersion::new();

        let installer = Installer::new(
            process.clone(),
            backup_gate.clone(),
            install_dir,
            config.ignore_files.clone(),
        );
        let scheduler = InstallScheduler::new(
            process,
            idle.clone(),
            installer,
            config.installation_time.clone(),
        );
        let manager = UpdateManager::new(
            VersionSource::new(),
            scheduler,
            config.installation_mode,
            config.check_interval(),
            current_version.clone(),
        );

        Self {
            idle,
            backup_gate,
            current_version,
            manager,
        }
    }

    /// Replace the default version source (page URL, platform, download dir).
    pub fn with_source(mut self, source: VersionSource) -> Self {
        self.manager.source = source;
        self
    }

    pub fn idle_tracker(&self) -> Arc<IdleTracker> {
        self.idle.clone()
    }

    /// Hook for the backup subsystem's begin/end notifications.
    pub fn backup_gate(&self) -> Arc<BackupGate> {
        self.backup_gate.clone()
    }

    pub fn current_version(&self) -> Option<Version> {
        self.current_version.get()
    }

    pub fn manager(&self) -> &UpdateManager {
        &self.manager
    }

    /// Apply one supervisor event. Only touches signals; never blocks.
    pub fn handle_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::Exited => self.idle.on_process_exited(),
            ServerEvent::Line(line) => match ConsoleEvent::parse(line) {
                Some(ConsoleEvent::VersionDetected(version)) => {
                    tracing::info!(version = %version, "Detected server version");
                    self.current_version.set(version);
                }
                Some(ConsoleEvent::PlayerConnected(player)) => {
                    tracing::debug!(player = %player, "Player joined");
                    self.idle.on_player_connected();
                }
                Some(ConsoleEvent::PlayerDisconnected(player)) => {
                    tracing::debug!(player = %player, "Player left");
                    self.idle.on_player_disconnected();
                }
                None => {}
            },
        }
    }

    /// Consume supervisor events and run the update loop until `cancel`
    /// fires. Subscribe `events` before starting the server so the version
    /// line is not missed.
    pub async fn run(&self, events: broadcast::Receiver<ServerEvent>, cancel: CancellationToken) {
        tokio::join!(
            self.dispatch_events(events, &cancel),
            self.manager.run(&cancel)
        );
    }

    async fn dispatch_events(
        &self,
        mut events: broadcast::Receiver<ServerEvent>,
        cancel: &CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => self.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Console dispatcher fell behind, events dropped");
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Server event stream closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;

    fn orchestrator() -> Orchestrator {
        let server = Arc::new(FakeServer::running());
        Orchestrator::new(&UpdateConfig::default(), std::env::temp_dir(), server)
    }

    fn line(text: &str) -> ServerEvent {
        ServerEvent::Line(text.to_string())
    }

    #[test]
    fn test_version_line_sets_current_version() {
        let orch = orchestrator();
        assert!(orch.current_version().is_none());
        orch.handle_event(&line("[INFO] Version: 1.20.0.01"));
        assert_eq!(orch.current_version(), Some("1.20.0.1".parse().unwrap()));
    }

    #[test]
    fn test_chat_does_not_change_version_or_players() {
        let orch = orchestrator();
        orch.handle_event(&line("[INFO] Version: 1.20.0.01"));
        orch.handle_event(&line("[2024-06-01 12:10:00:000 INFO] <Steve> Version 99.0"));
        orch.handle_event(&line("[INFO] <Steve> Player connected: ghost"));

        assert_eq!(orch.current_version(), Some("1.20.0.1".parse().unwrap()));
        assert_eq!(orch.idle_tracker().player_count(), 0);
        assert!(orch.idle_tracker().is_idle());
    }

    #[test]
    fn test_player_events_drive_idle() {
        let orch = orchestrator();
        let idle = orch.idle_tracker();

        orch.handle_event(&line("[INFO] Player connected: Steve, xuid: 1"));
        orch.handle_event(&line("[INFO] Player connected: Alex, xuid: 2"));
        assert!(!idle.is_idle());

        orch.handle_event(&line("[INFO] Player disconnected: Steve, xuid: 1"));
        assert!(!idle.is_idle());

        orch.handle_event(&ServerEvent::Exited);
        assert!(idle.is_idle());
        assert_eq!(idle.player_count(), 0);
    }

    #[test]
    fn test_config_is_applied() {
        let config = UpdateConfig {
            installation_mode: crate::config::InstallationMode::Immediate,
            update_check_interval: 5.0,
            ..Default::default()
        };
        let orch = Orchestrator::new(
            &config,
            std::env::temp_dir(),
            Arc::new(FakeServer::running()),
        );
        assert_eq!(
            orch.manager().mode(),
            crate::config::InstallationMode::Immediate
        );
        assert_eq!(orch.manager().interval(), std::time::Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let server = Arc::new(FakeServer::running());
        let orch = Orchestrator::new(&UpdateConfig::default(), std::env::temp_dir(), server.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        orch.run(server.subscribe(), cancel).await;
    }
}
