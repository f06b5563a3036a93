//! Updater configuration
//!
//! Stored as JSON next to the server. Field names follow the host's
//! PascalCase convention:
//!
//! ```json
//! {
//!   "UpdateCheckInterval": 60.0,
//!   "InstallationMode": "idle",
//!   "InstallationTime": "04:00",
//!   "IgnoreFiles": ["server.properties", "whitelist.json", "permissions.json"]
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};

pub const DEFAULT_CHECK_INTERVAL_MINUTES: f64 = 60.0;
pub const DEFAULT_INSTALLATION_TIME: &str = "04:00";
pub const DEFAULT_IGNORE_FILES: [&str; 3] =
    ["server.properties", "whitelist.json", "permissions.json"];

/// When a downloaded update gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstallationMode {
    /// Warn players, wait one minute, install.
    Immediate,
    /// Install at the configured time of day.
    Scheduled,
    /// Install as soon as no player is connected.
    #[default]
    Idle,
}

impl InstallationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Scheduled => "scheduled",
            Self::Idle => "idle",
        }
    }
}

impl From<String> for InstallationMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Self::Immediate,
            "scheduled" => Self::Scheduled,
            "idle" => Self::Idle,
            other => {
                tracing::warn!(mode = other, "Unknown installation mode, falling back to idle");
                Self::Idle
            }
        }
    }
}

impl From<InstallationMode> for String {
    fn from(mode: InstallationMode) -> Self {
        mode.as_str().to_string()
    }
}

impl std::fmt::Display for InstallationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateConfig {
    /// Minutes between two checks.
    pub update_check_interval: f64,
    pub installation_mode: InstallationMode,
    /// `HH:MM`, only used by [`InstallationMode::Scheduled`].
    pub installation_time: String,
    /// Bare file names never overwritten by an install.
    pub ignore_files: BTreeSet<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            update_check_interval: DEFAULT_CHECK_INTERVAL_MINUTES,
            installation_mode: InstallationMode::default(),
            installation_time: DEFAULT_INSTALLATION_TIME.to_string(),
            ignore_files: DEFAULT_IGNORE_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UpdateConfig {
    /// The check interval as a duration. Non-finite or non-positive values
    /// fall back to the default interval.
    pub fn check_interval(&self) -> Duration {
        let minutes = self.update_check_interval;
        if !minutes.is_finite() || minutes <= 0.0 {
            tracing::warn!(
                interval = minutes,
                "Invalid update check interval, using {} minutes",
                DEFAULT_CHECK_INTERVAL_MINUTES
            );
            return Duration::from_secs_f64(DEFAULT_CHECK_INTERVAL_MINUTES * 60.0);
        }
        Duration::try_from_secs_f64(minutes * 60.0)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_CHECK_INTERVAL_MINUTES * 60.0))
    }

    /// Parse [`Self::installation_time`].
    pub fn installation_time_of_day(&self) -> UpdateResult<NaiveTime> {
        parse_time_of_day(&self.installation_time)
    }

    /// Read the config at `path`, or write the defaults there if the file
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> UpdateResult<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        config.save(path)?;
        tracing::info!(path = ?path, "Wrote default updater configuration");
        Ok(config)
    }

    pub fn load(path: &Path) -> UpdateResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| UpdateError::Config(format!("failed to read {:?}: {}", path, e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| UpdateError::Config(format!("failed to parse {:?}: {}", path, e)))?;
        tracing::debug!(path = ?path, mode = %config.installation_mode, "Loaded updater configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> UpdateResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!("failed to create {:?}: {}", parent, e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| UpdateError::Config(format!("failed to write {:?}: {}", path, e)))
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time_of_day(text: &str) -> UpdateResult<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .map_err(|_| UpdateError::Config(format!("invalid installation time {:?}", text)))
}
