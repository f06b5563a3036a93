//! Test doubles shared by the unit tests.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::process::{ProcessError, ServerEvent, ServerProcess, STOP_COMMAND};

/// In-memory server: `stop` makes it exit, `start` brings it back.
pub(crate) struct FakeServer {
    running: AtomicBool,
    ignore_stop: AtomicBool,
    stuck_console: AtomicBool,
    commands: Mutex<Vec<String>>,
    starts: AtomicUsize,
    releases: AtomicUsize,
    events: broadcast::Sender<ServerEvent>,
}

impl FakeServer {
    fn with_state(running: bool) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            running: AtomicBool::new(running),
            ignore_stop: AtomicBool::new(false),
            stuck_console: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            events,
        }
    }

    pub fn running() -> Self {
        Self::with_state(true)
    }

    pub fn stopped() -> Self {
        Self::with_state(false)
    }

    pub fn ignoring_stop(self) -> Self {
        self.ignore_stop.store(true, Ordering::SeqCst);
        self
    }

    /// Console writes never complete, like a child that stopped reading
    /// its stdin.
    pub fn with_stuck_console(self) -> Self {
        self.stuck_console.store(true, Ordering::SeqCst);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter_map(|c| c.strip_prefix("say ").map(str::to_string))
            .collect()
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_running_now(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerProcess for FakeServer {
    async fn is_running(&self) -> bool {
        self.is_running_now()
    }

    async fn send_command(&self, command: &str) -> Result<(), ProcessError> {
        if !self.is_running_now() {
            return Err(ProcessError::NotRunning);
        }
        if self.stuck_console.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.commands.lock().push(command.to_string());
        if command == STOP_COMMAND && !self.ignore_stop.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            let _ = self.events.send(ServerEvent::Exited);
        }
        Ok(())
    }

    async fn wait_for_exit(&self) -> Result<(), ProcessError> {
        while self.is_running_now() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    async fn start(&self) -> Result<(), ProcessError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ProcessError::AlreadyRunning);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}

/// Write a zip archive. Names ending in `/` become directory entries.
pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    let options = FileOptions::default().unix_permissions(0o755);
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap();
}
