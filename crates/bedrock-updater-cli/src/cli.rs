//! Command line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const CONFIG_FILE_NAME: &str = "updater.json";

#[cfg(windows)]
pub const SERVER_BINARY_NAME: &str = "bedrock_server.exe";
#[cfg(not(windows))]
pub const SERVER_BINARY_NAME: &str = "bedrock_server";

#[derive(Debug, Parser)]
#[command(
    name = "bedrock-updater",
    version,
    about = "Runs a Bedrock dedicated server and keeps it on the latest release"
)]
pub struct Cli {
    /// Server installation directory
    #[arg(long, global = true, default_value = ".")]
    pub server_dir: PathBuf,

    /// Updater configuration file [default: <server-dir>/updater.json]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server executable, relative paths resolve against the server directory
    #[arg(long, global = true)]
    pub server_binary: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "bedrock_updater=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write logs to this file, rotated daily
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Start the server and keep it updated until Ctrl-C
    Run,
    /// Print the latest published server version and exit
    Check,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.server_dir.join(CONFIG_FILE_NAME))
    }

    pub fn server_binary(&self) -> PathBuf {
        match &self.server_binary {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.server_dir.join(path),
            None => self.server_dir.join(SERVER_BINARY_NAME),
        }
    }
}
