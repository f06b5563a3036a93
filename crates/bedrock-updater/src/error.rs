//! Update error types
//!
//! Every failure an update cycle can hit is an [`UpdateError`]. The update
//! loop never propagates these past a single cycle; it classifies them with
//! [`UpdateError::kind`] and logs them.

use thiserror::Error;

use crate::installer::InstallError;
use crate::process::ProcessError;
use crate::version::ParseVersionError;

/// Coarse classification used for logging and for deciding what players see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network error, bad HTTP status or an unparseable distribution page.
    CheckFailure,
    /// The archive stream broke mid-transfer.
    DownloadFailure,
    /// The install transaction failed; operator attention required.
    InstallFailure,
    /// The shutdown signal fired.
    Cancelled,
    /// Anything else.
    Unexpected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckFailure => write!(f, "check failure"),
            Self::DownloadFailure => write!(f, "download failure"),
            Self::InstallFailure => write!(f, "install failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unexpected => write!(f, "unexpected failure"),
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to fetch distribution page: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("distribution page returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("no {platform} download link found on the distribution page")]
    NoDownloadLink { platform: &'static str },

    #[error("published version is malformed: {0}")]
    Version(#[from] ParseVersionError),

    #[error("archive download failed: {0}")]
    Download(#[source] reqwest::Error),

    #[error("archive download returned HTTP {0}")]
    DownloadStatus(reqwest::StatusCode),

    #[error("failed to write downloaded archive: {0}")]
    DownloadIo(#[source] std::io::Error),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(_) | Self::Status(_) | Self::NoDownloadLink { .. } | Self::Version(_) => {
                ErrorKind::CheckFailure
            }
            Self::Download(_) | Self::DownloadStatus(_) | Self::DownloadIo(_) => {
                ErrorKind::DownloadFailure
            }
            Self::Install(_) => ErrorKind::InstallFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<ProcessError> for UpdateError {
    fn from(err: ProcessError) -> Self {
        Self::Install(InstallError::Process(err))
    }
}

pub type UpdateResult<T> = Result<T, UpdateError>;
