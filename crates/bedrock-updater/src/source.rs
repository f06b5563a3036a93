//! Version source client
//!
//! Scrapes the official download page for the newest dedicated server build
//! and streams its archive to a temporary file. Failures never escape
//! [`VersionSource::check_for_update`]: they are logged and the caller simply
//! gets nothing, so the update loop keeps its schedule.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::{UpdateError, UpdateResult};
use crate::version::Version;

pub const DEFAULT_PAGE_URL: &str = "https://www.minecraft.net/en-us/download/server/bedrock";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const ACCEPT_ENCODING: &str = "gzip, deflate, br";

static LINUX_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s"'<>]+/bin-linux/bedrock-server-(\d+(?:\.\d+){1,3})\.zip"#)
        .expect("valid linux link regex")
});

static WINDOWS_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s"'<>]+/bin-win/bedrock-server-(\d+(?:\.\d+){1,3})\.zip"#)
        .expect("valid windows link regex")
});

/// Server builds are published per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }

    fn link_pattern(&self) -> &'static Regex {
        match self {
            Self::Linux => &LINUX_LINK,
            Self::Windows => &WINDOWS_LINK,
        }
    }
}

/// A build advertised on the download page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: Version,
    pub url: String,
}

/// Find the platform's archive link and the version embedded in it.
pub fn find_release(page: &str, platform: Platform) -> UpdateResult<Release> {
    let caps = platform
        .link_pattern()
        .captures(page)
        .ok_or(UpdateError::NoDownloadLink {
            platform: platform.name(),
        })?;
    Ok(Release {
        version: caps[1].parse()?,
        url: caps[0].to_string(),
    })
}

/// A newer build, downloaded and waiting to be installed.
///
/// The archive is deleted when this value is dropped, whatever happened to
/// the install.
#[derive(Debug)]
pub struct DownloadedUpdate {
    pub version: Version,
    pub archive: TempPath,
}

impl DownloadedUpdate {
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }
}

/// Client for the official server download page.
#[derive(Debug, Clone)]
pub struct VersionSource {
    client: Client,
    page_url: String,
    platform: Platform,
    download_dir: PathBuf,
}

impl Default for VersionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionSource {
    /// Official page, the build platform of this binary, the system temp
    /// dir and a ten minute request timeout.
    pub fn new() -> Self {
        Self {
            client: build_client(Duration::from_secs(600)),
            page_url: DEFAULT_PAGE_URL.to_string(),
            platform: Platform::current(),
            download_dir: std::env::temp_dir(),
        }
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = url.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Directory the temporary archive is created in.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Download the published build if it is newer than `current`.
    ///
    /// Returns `None` when there is nothing newer, when anything goes wrong
    /// (logged), or when cancelled. No partial archive is left behind.
    pub async fn check_for_update(
        &self,
        current: &Version,
        cancel: &CancellationToken,
    ) -> Option<DownloadedUpdate> {
        match self.try_check_for_update(current, cancel).await {
            Ok(update) => update,
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Update check cancelled");
                None
            }
            Err(e) => {
                tracing::warn!(kind = %e.kind(), error = %e, "Update check failed");
                None
            }
        }
    }

    async fn try_check_for_update(
        &self,
        current: &Version,
        cancel: &CancellationToken,
    ) -> UpdateResult<Option<DownloadedUpdate>> {
        let release = self.latest_release(cancel).await?;
        if release.version <= *current {
            tracing::info!(
                current = %current,
                published = %release.version,
                "Server is up to date, nothing to do"
            );
            return Ok(None);
        }

        tracing::info!(
            current = %current,
            published = %release.version,
            url = %release.url,
            "New server version available, downloading"
        );
        let archive = self.download(&release.url, cancel).await?;
        Ok(Some(DownloadedUpdate {
            version: release.version,
            archive,
        }))
    }

    /// Fetch the download page and extract the current release.
    pub async fn latest_release(&self, cancel: &CancellationToken) -> UpdateResult<Release> {
        let page = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            page = self.fetch_page() => page?,
        };
        find_release(&page, self.platform)
    }

    async fn fetch_page(&self) -> UpdateResult<String> {
        let response = self
            .client
            .get(&self.page_url)
            .send()
            .await
            .map_err(UpdateError::Fetch)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Status(status));
        }
        response.text().await.map_err(UpdateError::Fetch)
    }

    async fn download(&self, url: &str, cancel: &CancellationToken) -> UpdateResult<TempPath> {
        let (file, path) = tempfile::Builder::new()
            .prefix("bedrock-server-")
            .suffix(".zip")
            .tempfile_in(&self.download_dir)
            .map_err(UpdateError::DownloadIo)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
            response = self.client.get(url).send() => response.map_err(UpdateError::Download)?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadStatus(status));
        }

        let expected = response.content_length();
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(UpdateError::Cancelled),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes)
                        .await
                        .map_err(UpdateError::DownloadIo)?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(UpdateError::Download(e)),
                None => break,
            }
        }
        file.flush().await.map_err(UpdateError::DownloadIo)?;
        drop(file);

        tracing::info!(
            path = ?&*path,
            bytes = written,
            expected = ?expected,
            "Downloaded server archive"
        );
        Ok(path)
    }
}

fn build_client(timeout: Duration) -> Client {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static(ACCEPT_ENCODING),
    );

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}
