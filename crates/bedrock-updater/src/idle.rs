//! Player presence tracking
//!
//! Counts connected players from console notifications and exposes an
//! "idle" signal: set while nobody is connected or the server is down.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::UpdateResult;
use crate::signal::LevelSignal;

/// Net player count and the idle signal derived from it. Idle holds
/// exactly while the count is at or below zero.
#[derive(Debug)]
pub struct IdleTracker {
    players: Mutex<i64>,
    idle: LevelSignal,
}

impl IdleTracker {
    /// Starts idle with nobody connected.
    pub fn new() -> Self {
        Self {
            players: Mutex::new(0),
            idle: LevelSignal::new(true),
        }
    }

    pub fn on_player_connected(&self) {
        // Signal updates happen under the counter lock so the level always
        // matches the count.
        let mut players = self.players.lock();
        *players += 1;
        self.sync_signal(*players);
        tracing::debug!(players = *players, "Player connected");
    }

    pub fn on_player_disconnected(&self) {
        let mut players = self.players.lock();
        *players -= 1;
        self.sync_signal(*players);
        tracing::debug!(players = *players, "Player disconnected");
    }

    /// A stopped server has no players, whatever the counter says.
    pub fn on_process_exited(&self) {
        let mut players = self.players.lock();
        *players = 0;
        self.sync_signal(*players);
        tracing::debug!("Server exited, player count reset");
    }

    fn sync_signal(&self, players: i64) {
        if players > 0 {
            self.idle.clear();
        } else {
            self.idle.set();
        }
    }

    pub fn player_count(&self) -> i64 {
        *self.players.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_set()
    }

    pub async fn wait_idle(&self, cancel: &CancellationToken) -> UpdateResult<()> {
        self.idle.wait(cancel).await
    }
}

impl Default for IdleTracker {
    fn default() -> Self {
        Self::new()
    }
}
