//! Politeness-aware HTTP client.
//!
//! Every request attempt waits `request_delay` first, carries the configured
//! user agent, and is bounded by `timeout`. Callers issue requests one at a
//! time; nothing here runs them concurrently.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};

use napscrape_core::FetchConfig;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("could not fetch {url} after {attempts} attempts: {last}")]
    ConnectionFailed {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

/// Why a single PDF download attempt failed.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("invalid PDF link {link:?}: {source}")]
    InvalidUrl {
        link: String,
        #[source]
        source: url::ParseError,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyDownload,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// HTTP client that spaces out and retries requests per [`FetchConfig`].
pub struct PoliteClient {
    client: reqwest::Client,
    config: FetchConfig,
    base: Url,
}

impl PoliteClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let base = Url::parse(&config.table_url).map_err(|source| FetchError::InvalidUrl {
            url: config.table_url.clone(),
            source,
        })?;
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self {
            client,
            config,
            base,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// The submissions page; also the base for relative links.
    pub fn table_url(&self) -> &Url {
        &self.base
    }

    /// Resolve an absolute or site-relative link against the table page.
    pub fn resolve(&self, link: &str) -> Result<Url, url::ParseError> {
        self.base.join(link.trim())
    }

    /// Fetch the submissions page, retrying with backoff.
    ///
    /// Exhausting all attempts yields [`FetchError::ConnectionFailed`].
    pub async fn fetch_table_page(&self) -> Result<String, FetchError> {
        let url = self.base.clone();
        info!(url = %url, "fetching submissions table");
        let (result, attempts) = retry(&self.config, url.as_str(), || self.get_text(&url)).await;
        result.map_err(|last| FetchError::ConnectionFailed {
            url: url.to_string(),
            attempts,
            last: Box::new(last),
        })
    }

    /// One polite GET returning the body as text. Only HTTP 200 is success.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.pause().await;
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }

    /// One polite GET streaming the body to `dest`. Returns the byte count.
    ///
    /// The body lands in `<dest>.part` and is renamed over `dest` only once it
    /// is complete and non-empty, so a failed attempt never clobbers a good file.
    pub async fn download_to(&self, url: &Url, dest: &Path) -> Result<u64, DownloadError> {
        let part = part_path(dest);
        let result = self.stream_to(url, &part).await;
        match result {
            Ok(0) => {
                remove_quietly(&part).await;
                Err(DownloadError::EmptyDownload)
            }
            Ok(bytes) => {
                tokio::fs::rename(&part, dest)
                    .await
                    .map_err(|source| DownloadError::Io {
                        path: dest.to_path_buf(),
                        source,
                    })?;
                Ok(bytes)
            }
            Err(e) => {
                remove_quietly(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &Url, path: &Path) -> Result<u64, DownloadError> {
        self.pause().await;
        let mut resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let io_err = |source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut written = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        Ok(written)
    }

    async fn pause(&self) {
        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }
    }
}

/// Run `op` up to `max_attempts` times, sleeping the exponential backoff
/// before each retry. Returns the last result and the number of attempts made.
pub async fn retry<T, E, F, Fut>(config: &FetchConfig, what: &str, mut op: F) -> (Result<T, E>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let backoff = config.backoff_before(attempt);
        if !backoff.is_zero() {
            debug!(url = what, attempt, backoff_ms = backoff.as_millis() as u64, "backing off");
            tokio::time::sleep(backoff).await;
        }
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if attempt < max => {
                warn!(url = what, attempt, max, error = %e, "attempt failed, retrying");
            }
            Err(e) => {
                warn!(url = what, attempt, max, error = %e, "attempt failed, giving up");
                return (Err(e), attempt);
            }
        }
        attempt += 1;
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove partial download");
        }
    }
}
