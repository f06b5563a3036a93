//! Level-triggered signal
//!
//! A boolean that can be set, cleared and awaited. Waiters observe the
//! current level, never a queue of transitions: a clear/set pair that
//! finishes before someone starts waiting is seen as "set".

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{UpdateError, UpdateResult};

/// A boolean level that tasks can wait on.
#[derive(Debug)]
pub struct LevelSignal {
    tx: watch::Sender<bool>,
}

impl LevelSignal {
    /// Create a signal with the given initial level.
    pub fn new(initially_set: bool) -> Self {
        let (tx, _) = watch::channel(initially_set);
        Self { tx }
    }

    pub fn set(&self) {
        self.tx.send_if_modified(|level| !std::mem::replace(level, true));
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|level| std::mem::replace(level, false));
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is set, or fail with
    /// [`UpdateError::Cancelled`] when `cancel` fires first.
    pub async fn wait(&self, cancel: &CancellationToken) -> UpdateResult<()> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => Err(UpdateError::Cancelled),
            // The sender lives in `self`, so the channel cannot close here.
            _ = rx.wait_for(|level| *level) => Ok(()),
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> UpdateResult<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(UpdateError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
