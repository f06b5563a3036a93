//! Server version numbers
//!
//! Bedrock builds are numbered `major.minor.patch.revision`. Published
//! versions and the version the server prints on startup do not always carry
//! the same number of components, so comparison pads the shorter one with
//! zeros: `1.2 == 1.2.0.0` and `1.2 < 1.2.1`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Maximum number of dotted components.
pub const MAX_COMPONENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    #[error("empty version string")]
    Empty,
    #[error("version {0:?} has more than four components")]
    TooManyComponents(String),
    #[error("version component {0:?} is not a non-negative integer")]
    InvalidComponent(String),
}

/// A dotted version of one to four non-negative components.
#[derive(Debug, Clone, Copy)]
pub struct Version {
    parts: [u32; MAX_COMPONENTS],
    len: usize,
}

impl Version {
    /// Build a version from its components. Extra components past the
    /// fourth are rejected.
    pub fn new(components: &[u32]) -> Result<Self, ParseVersionError> {
        if components.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        if components.len() > MAX_COMPONENTS {
            let text = components
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(".");
            return Err(ParseVersionError::TooManyComponents(text));
        }

        let mut parts = [0; MAX_COMPONENTS];
        parts[..components.len()].copy_from_slice(components);
        Ok(Self {
            parts,
            len: components.len(),
        })
    }

    /// Components as written, without padding.
    pub fn components(&self) -> &[u32] {
        &self.parts[..self.len]
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseVersionError::Empty);
        }

        let mut components = Vec::with_capacity(MAX_COMPONENTS);
        for part in s.split('.') {
            let value = part
                .parse::<u32>()
                .map_err(|_| ParseVersionError::InvalidComponent(part.to_string()))?;
            components.push(value);
        }
        if components.len() > MAX_COMPONENTS {
            return Err(ParseVersionError::TooManyComponents(s.to_string()));
        }
        Self::new(&components)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.components().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

// Unused trailing slots are always zero, so comparing the padded arrays
// gives zero-padded ordering.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The version the running server reported on startup.
///
/// Unknown until the first version line shows up on the console. The update
/// loop does not start polling before that.
#[derive(Debug, Clone)]
pub struct CurrentVersion {
    tx: std::sync::Arc<watch::Sender<Option<Version>>>,
}

impl CurrentVersion {
    /// Starts unknown.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn get(&self) -> Option<Version> {
        *self.tx.borrow()
    }

    pub fn set(&self, version: Version) {
        self.tx.send_replace(Some(version));
    }

    /// Wait until a version is known. Returns `None` if cancelled first.
    pub async fn wait_known(&self, cancel: &CancellationToken) -> Option<Version> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => None,
            known = rx.wait_for(Option::is_some) => known.ok().and_then(|v| *v),
        }
    }
}

impl Default for CurrentVersion {
    fn default() -> Self {
        Self::new()
    }
}
