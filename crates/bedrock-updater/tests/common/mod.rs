//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bedrock_updater::{ProcessError, ServerEvent, ServerProcess};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Scripted server double. `stop` makes it exit, `start` brings it back and
/// prints the configured version line, like the real server does.
pub struct ScriptedServer {
    running: AtomicBool,
    commands: Mutex<Vec<String>>,
    starts: AtomicUsize,
    version_on_start: Mutex<Option<String>>,
    events: broadcast::Sender<ServerEvent>,
}

impl ScriptedServer {
    pub fn running() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            running: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            version_on_start: Mutex::new(None),
            events,
        }
    }

    pub fn announce_on_start(&self, version: &str) {
        *self.version_on_start.lock() = Some(version.to_string());
    }

    pub fn emit_line(&self, line: &str) {
        let _ = self.events.send(ServerEvent::Line(line.to_string()));
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

    pub fn is_running_now(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerProcess for ScriptedServer {
    async fn is_running(&self) -> bool {
        self.is_running_now()
    }

    async fn send_command(&self, command: &str) -> Result<(), ProcessError> {
        if !self.is_running_now() {
            return Err(ProcessError::NotRunning);
        }
        self.commands.lock().push(command.to_string());
        if command == "stop" {
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

    async fn release(&self) {}

    async fn start(&self) -> Result<(), ProcessError> {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        let version = self.version_on_start.lock().clone();
        if let Some(version) = version {
            self.emit_line(&format!("[INFO] Version: {}", version));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}

/// Zip archive bytes. Names ending in `/` become directory entries.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// A download page linking both platform builds of `version` on `base`.
pub fn download_page(base: &str, version: &str) -> String {
    format!(
        r#"<html><body>
        <a href="{base}/bin-win/bedrock-server-{version}.zip" data-platform="serverBedrockWindows">Download</a>
        <a href="{base}/bin-linux/bedrock-server-{version}.zip" data-platform="serverBedrockLinux">Download</a>
        </body></html>"#
    )
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub fn dir_is_empty(path: &std::path::Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}
