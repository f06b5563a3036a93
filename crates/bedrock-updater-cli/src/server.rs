//! Child process supervisor
//!
//! Runs the dedicated server as a child with piped stdio. Console output is
//! echoed to the terminal and published as [`ServerEvent::Line`]; the exit
//! is published as [`ServerEvent::Exited`] once both pipes are drained.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bedrock_updater::{ProcessError, ServerEvent, ServerProcess};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 1000;

/// Handles of one started process.
struct Session {
    stdin: ChildStdin,
    monitor: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

pub struct ChildServer {
    binary: PathBuf,
    working_dir: PathBuf,
    session: Mutex<Option<Session>>,
    running: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<ServerEvent>,
}

impl ChildServer {
    pub fn new(binary: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let (running, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
            session: Mutex::new(None),
            running: Arc::new(running),
            events,
        }
    }

    /// Kill the process without asking. Last resort when `stop` is ignored.
    pub async fn kill(&self) {
        if !*self.running.borrow() {
            return;
        }
        if let Some(session) = self.session.lock().await.take() {
            // The monitor owns the child; aborting it drops the child, which
            // kills it (`kill_on_drop`).
            session.monitor.abort();
            let _ = session.monitor.await;
            self.running.send_replace(false);
            let _ = self.events.send(ServerEvent::Exited);
            tracing::warn!(binary = ?self.binary, "Server process killed");
        }
    }

    fn spawn_reader<R>(&self, pipe: R, kind: Pipe) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match kind {
                    Pipe::Stdout => println!("{}", line),
                    Pipe::Stderr => eprintln!("{}", line),
                }
                let _ = events.send(ServerEvent::Line(line));
            }
        })
    }
}

#[async_trait]
impl ServerProcess for ChildServer {
    async fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    async fn send_command(&self, command: &str) -> Result<(), ProcessError> {
        let mut session = self.session.lock().await;
        let session = match session.as_mut() {
            Some(session) if *self.running.borrow() => session,
            _ => return Err(ProcessError::NotRunning),
        };
        session
            .stdin
            .write_all(format!("{}\n", command).as_bytes())
            .await?;
        session.stdin.flush().await?;
        tracing::debug!(command, "Sent console command");
        Ok(())
    }

    async fn wait_for_exit(&self) -> Result<(), ProcessError> {
        let mut rx = self.running.subscribe();
        rx.wait_for(|running| !*running)
            .await
            .map(|_| ())
            .map_err(|_| ProcessError::Other("process state channel closed".to_string()))
    }

    async fn release(&self) {
        if *self.running.borrow() {
            tracing::warn!("Refusing to release a running server process");
            return;
        }
        if let Some(session) = self.session.lock().await.take() {
            drop(session.stdin);
            let _ = session.monitor.await;
        }
    }

    async fn start(&self) -> Result<(), ProcessError> {
        let mut session = self.session.lock().await;
        if *self.running.borrow() {
            return Err(ProcessError::AlreadyRunning);
        }
        if let Some(previous) = session.take() {
            let _ = previous.monitor.await;
        }

        let mut command = Command::new(&self.binary);
        command
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The Linux build loads its bundled libraries from the install dir.
        #[cfg(unix)]
        command.env("LD_LIBRARY_PATH", &self.working_dir);

        let mut child = command.spawn()?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::Other("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Other("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Other("child stderr was not captured".to_string()))?;

        self.running.send_replace(true);
        let readers = [
            self.spawn_reader(stdout, Pipe::Stdout),
            self.spawn_reader(stderr, Pipe::Stderr),
        ];

        let running = self.running.clone();
        let events = self.events.clone();
        let monitor = tokio::spawn(async move {
            let status = child.wait().await;
            for reader in readers {
                let _ = reader.await;
            }
            match status {
                Ok(status) => tracing::info!(pid = ?pid, status = %status, "Server process exited"),
                Err(e) => tracing::error!(pid = ?pid, error = %e, "Failed to wait for server process"),
            }
            running.send_replace(false);
            let _ = events.send(ServerEvent::Exited);
        });

        *session = Some(Session { stdin, monitor });
        tracing::info!(pid = ?pid, binary = ?self.binary, "Server process started");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}
