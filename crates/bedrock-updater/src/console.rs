//! Console line recognition
//!
//! The server announces its version on startup and logs every player
//! connection and disconnection. Typical lines:
//!
//! ```text
//! [2024-06-01 12:00:00:123 INFO] Version: 1.20.0.01
//! [2024-06-01 12:05:10:001 INFO] Player connected: Steve, xuid: 2535412345678901
//! [2024-06-01 12:30:42:777 INFO] Player disconnected: Steve, xuid: 2535412345678901, pfid: 1a2b
//! ```
//!
//! Only lines starting with the server's own log prefix count. Chat is
//! logged as `[... INFO] <Steve> ...`, so player text can never pose as a
//! version or connection line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::version::Version;

// `[<timestamp> INFO]`, `[INFO]`, or the bare prefix of servers started
// without a log file.
const LOG_PREFIX: &str = r"^(?:NO LOG FILE! - \[\]|\[(?:[^\]]*\s)?INFO\])\s*";

static VERSION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}Version:?\s+(\d+(?:\.\d+){{0,3}})\s*$", LOG_PREFIX))
        .expect("valid version line regex")
});

static PLAYER_CONNECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}Player connected:\s*([^,]+)", LOG_PREFIX))
        .expect("valid player connected regex")
});

static PLAYER_DISCONNECTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}Player disconnected:\s*([^,]+)", LOG_PREFIX))
        .expect("valid player disconnected regex")
});

/// A console line the updater cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    VersionDetected(Version),
    PlayerConnected(String),
    PlayerDisconnected(String),
}

impl ConsoleEvent {
    pub fn parse(line: &str) -> Option<Self> {
        if let Some(caps) = PLAYER_CONNECTED.captures(line) {
            return Some(Self::PlayerConnected(caps[1].trim().to_string()));
        }
        if let Some(caps) = PLAYER_DISCONNECTED.captures(line) {
            return Some(Self::PlayerDisconnected(caps[1].trim().to_string()));
        }
        if let Some(caps) = VERSION_LINE.captures(line) {
            return caps[1].parse().ok().map(Self::VersionDetected);
        }
        None
    }
}
