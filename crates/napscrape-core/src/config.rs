//! Pipeline configuration.
//!
//! Every component receives its slice of [`PipelineConfig`] at construction;
//! nothing reads process-wide settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TABLE_URL: &str = "https://napcentral.org/submitted-naps";

const SNAPSHOT_FILE: &str = "nap_records.json";
const PUBLISHED_FILE: &str = "nap_dataset.json";
const PDF_SUBDIR: &str = "pdfs";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("chunk_size must be at least 1")]
    ZeroChunkSize,
    #[error("worker_cap must be at least 1")]
    ZeroWorkers,
    #[error("persist_every must be at least 1")]
    ZeroPersistInterval,
    #[error("table URL is empty")]
    EmptyTableUrl,
}

/// Politeness and retry settings shared by every outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Page holding the submissions table. Relative PDF links resolve against it.
    pub table_url: String,
    pub user_agent: String,
    /// Wait before every request attempt.
    pub request_delay: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Attempt `n` (1-based, `n >= 2`) additionally waits `base_backoff * 2^(n-1)`;
    /// attempt 1 never waits.
    pub base_backoff: Duration,
    /// Honour `HTTP(S)_PROXY` from the environment.
    pub use_system_proxy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            table_url: DEFAULT_TABLE_URL.to_string(),
            user_agent: format!("napscrape/{}", env!("CARGO_PKG_VERSION")),
            request_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            use_system_proxy: true,
        }
    }
}

impl FetchConfig {
    /// Extra wait before attempt `attempt` (1-based). The first attempt has none.
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 1).min(16);
        self.base_backoff.saturating_mul(1 << exp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Keep verified PDFs already on disk instead of fetching them again.
    pub skip_existing: bool,
    /// Persist the store after this many successful downloads.
    pub persist_every: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            skip_existing: true,
            persist_every: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// One document at a time, persisting after each.
    Sequential,
    /// Fixed-size chunks decoded by a bounded worker pool, persisting after each chunk.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractConfig {
    pub mode: ExtractMode,
    pub chunk_size: usize,
    /// Upper bound on parallel workers, independent of record count.
    pub worker_cap: usize,
    /// Decoding a single document longer than this counts as a failure.
    pub document_timeout: Duration,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            mode: ExtractMode::Sequential,
            chunk_size: 5,
            worker_cap: 4,
            document_timeout: Duration::from_secs(300),
        }
    }
}

impl ExtractConfig {
    /// Documents per persistence point.
    pub fn effective_chunk_size(&self) -> usize {
        match self.mode {
            ExtractMode::Sequential => 1,
            ExtractMode::Parallel => self.chunk_size.max(1),
        }
    }

    /// `min(available_parallelism - 1, worker_cap)`, never below one.
    pub fn worker_count(&self) -> usize {
        match self.mode {
            ExtractMode::Sequential => 1,
            ExtractMode::Parallel => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                cores.saturating_sub(1).min(self.worker_cap).max(1)
            }
        }
    }
}

/// Which records end up in the published dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFilter {
    #[default]
    All,
    ExtractedOnly,
}

/// Full configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root for the snapshot, the published dataset, and the PDF directory.
    pub cache_dir: PathBuf,
    pub fetch: FetchConfig,
    pub download: DownloadConfig,
    pub extract: ExtractConfig,
    pub publish: PublishFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::with_cache_dir(default_cache_dir())
    }
}

impl PipelineConfig {
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fetch: FetchConfig::default(),
            download: DownloadConfig::default(),
            extract: ExtractConfig::default(),
            publish: PublishFilter::default(),
        }
    }

    /// Working snapshot of the record store.
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir.join(SNAPSHOT_FILE)
    }

    /// Dataset artifact served by the no-refresh read path.
    pub fn published_path(&self) -> PathBuf {
        self.cache_dir.join(PUBLISHED_FILE)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.cache_dir.join(PDF_SUBDIR)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.table_url.trim().is_empty() {
            return Err(ConfigError::EmptyTableUrl);
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.download.persist_every == 0 {
            return Err(ConfigError::ZeroPersistInterval);
        }
        if self.extract.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.extract.worker_cap == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

/// `<platform cache dir>/napscrape`, or `.napscrape` when there is none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("napscrape"))
        .unwrap_or_else(|| PathBuf::from(".napscrape"))
}
