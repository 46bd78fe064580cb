//! Pipeline driver: scrape → download → extract → publish.
//!
//! [`Pipeline::refresh`] runs every stage against the working snapshot and
//! tolerates per-record failures. [`get_cached`] serves the last published
//! dataset without touching the network.

use std::path::PathBuf;
use std::sync::Arc;

use napscrape_core::{ConfigError, NapRecord, PipelineConfig, RunSummary};
use napscrape_extract::{ExtractReport, LopdfDecoder, PdfDecoder, TextExtractor};
use napscrape_fetch::{
    DownloadManager, DownloadReport, FetchError, PoliteClient, SkippedRow, TableError, extract_records,
};
use napscrape_store::{CachePaths, ClearReport, MergeReport, RecordStore, StoreError, snapshot};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not set up HTTP client: {0}")]
    Client(#[source] FetchError),

    #[error("could not reach the submissions page: {0}")]
    ConnectionFailed(#[source] FetchError),

    #[error("submissions page layout changed: {0}")]
    StructureNotFound(#[source] TableError),

    #[error("no cached dataset at {}", .0.display())]
    CacheMissing(PathBuf),

    #[error("cache storage failed: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CacheMissing(path) => Self::CacheMissing(path),
            other => Self::Store(other),
        }
    }
}

/// Caller overrides for one [`Pipeline::refresh`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Fetch the table even when the snapshot already has records.
    pub force_scrape: bool,
    /// Download every linked PDF again, ignoring what is on disk.
    pub force_download: bool,
}

/// What the table scrape did, when it ran.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub rows: usize,
    pub skipped: Vec<SkippedRow>,
    pub merge: MergeReport,
}

/// Final store and per-stage reports of one refresh.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub store: RecordStore,
    pub summary: RunSummary,
    /// `None` when the cached records were used without scraping.
    pub scrape: Option<ScrapeReport>,
    pub download: DownloadReport,
    pub extract: ExtractReport,
    pub published: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    client: PoliteClient,
    decoder: Arc<dyn PdfDecoder>,
}

impl Pipeline {
    /// Pipeline with the built-in `lopdf` decoder.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_decoder(config, Arc::new(LopdfDecoder))
    }

    pub fn with_decoder(config: PipelineConfig, decoder: Arc<dyn PdfDecoder>) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = PoliteClient::new(config.fetch.clone()).map_err(PipelineError::Client)?;
        Ok(Self {
            config,
            client,
            decoder,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage and publish the result.
    ///
    /// Only an unreachable or unrecognisable submissions page, or a failure
    /// to write the cache, is an error. Failed downloads and extractions are
    /// recorded on their records and reflected in the summary.
    pub async fn refresh(&self, options: RefreshOptions) -> Result<RefreshOutcome, PipelineError> {
        let snapshot_path = self.config.snapshot_path();
        let mut store = snapshot::load_or_default(&snapshot_path)?;
        let checkpoint = |s: &RecordStore| snapshot::save(s, &snapshot_path);

        // ── Scrape ──

        let scrape = if options.force_scrape || store.is_empty() {
            let report = self.scrape_into(&mut store).await?;
            checkpoint(&store)?;
            Some(report)
        } else {
            info!(records = store.len(), "using cached records, skipping table fetch");
            None
        };

        // ── Download ──

        let mut download_config = self.config.download.clone();
        if options.force_download {
            download_config.skip_existing = false;
        }
        let downloads = DownloadManager::new(&self.client, self.config.pdf_dir(), download_config);
        let download = downloads.run(&mut store, checkpoint).await?;

        // ── Extract ──

        let extractor = TextExtractor::new(Arc::clone(&self.decoder), self.config.extract.clone());
        let extract = extractor.run(&mut store, checkpoint).await?;

        // ── Publish ──

        checkpoint(&store)?;
        let published = snapshot::publish(&store, &self.config.published_path(), self.config.publish)?;

        let summary = store.summary();
        info!(
            total = summary.total,
            downloaded = summary.downloaded,
            extracted = summary.extracted,
            pages = summary.total_pages,
            "refresh complete"
        );
        for failure in &summary.failures {
            warn!(
                country = %failure.country_name,
                stage = ?failure.stage,
                attempts = failure.attempts,
                reason = %failure.reason,
                "record not processed"
            );
        }

        Ok(RefreshOutcome {
            store,
            summary,
            scrape,
            download,
            extract,
            published,
        })
    }

    async fn scrape_into(&self, store: &mut RecordStore) -> Result<ScrapeReport, PipelineError> {
        let html = self.client.fetch_table_page().await.map_err(|e| {
            error!(error = %e, "submissions page unreachable");
            PipelineError::ConnectionFailed(e)
        })?;
        let scan = extract_records(&html).map_err(|e| {
            error!(error = %e, "submissions table not found");
            PipelineError::StructureNotFound(e)
        })?;
        let rows = scan.records.len();
        let merge = store.merge_scraped(scan.records);
        info!(
            rows,
            added = merge.added,
            updated = merge.updated,
            reset = merge.reset,
            skipped = scan.skipped.len(),
            "table merged into store"
        );
        Ok(ScrapeReport {
            rows,
            skipped: scan.skipped,
            merge,
        })
    }
}

/// The last published dataset. No network access.
pub fn get_cached(config: &PipelineConfig) -> Result<Vec<NapRecord>, PipelineError> {
    Ok(snapshot::read_published(&config.published_path())?)
}

/// The working snapshot, including records still in progress.
pub fn load_snapshot(config: &PipelineConfig) -> Result<RecordStore, PipelineError> {
    Ok(snapshot::load(&config.snapshot_path())?)
}

pub fn cache_paths(config: &PipelineConfig) -> CachePaths {
    CachePaths {
        snapshot: config.snapshot_path(),
        published: config.published_path(),
        pdf_dir: config.pdf_dir(),
    }
}

/// Discard the snapshot and published dataset, and the PDFs if asked.
pub fn clear_cache(config: &PipelineConfig, also_remove_pdfs: bool) -> Result<ClearReport, PipelineError> {
    Ok(napscrape_store::clear(&cache_paths(config), also_remove_pdfs)?)
}

#[cfg(test)]
mod tests {
    use napscrape_core::{PublishFilter, RecordState};
    use napscrape_extract::{DecodedPdf, ExtractError};
    use napscrape_fetch::test_support::{Route, TestServer, fast_config};
    use tempfile::TempDir;

    use super::*;

    /// Treats the file body as UTF-8 text with pages separated by form feeds.
    struct FormFeedDecoder;

    impl PdfDecoder for FormFeedDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<DecodedPdf, ExtractError> {
            let body = std::str::from_utf8(bytes).map_err(|e| ExtractError::Decode(e.to_string()))?;
            Ok(DecodedPdf {
                pages: body.split('\x0c').map(str::to_string).collect(),
            })
        }
    }

    fn row(id: &str, country: &str, languages: &str) -> String {
        format!(
            "<tr><td>{id}</td><td>{country}</td><td>Africa</td><td>LDC</td>\
             <td>{languages}</td><td>2024-01-15</td></tr>"
        )
    }

    fn table(rows: &[String]) -> String {
        format!(
            "<html><body><table><thead><tr><th>ID</th><th>Country</th><th>Region</th>\
             <th>Marker</th><th>Languages</th><th>Date</th></tr></thead>\
             <tbody>{}</tbody></table></body></html>",
            rows.concat()
        )
    }

    fn english(href: &str) -> String {
        format!(r#"<a href="{href}">French</a> <a href="{href}">English</a>"#)
    }

    fn pipeline(server: &TestServer, cache: &TempDir) -> Pipeline {
        let mut config = PipelineConfig::with_cache_dir(cache.path());
        config.fetch = fast_config(server.url("/naps"));
        Pipeline::with_decoder(config, Arc::new(FormFeedDecoder)).unwrap()
    }

    fn scenario_server() -> TestServer {
        let html = table(&[
            row("1", "Kenya", &english("/files/kenya.pdf")),
            row("2", "Chad", "No document yet"),
            row("3", "Peru", &english("/files/peru.pdf")),
        ]);
        TestServer::start(vec![
            ("/naps", Route::html(&html)),
            ("/files/kenya.pdf", Route::pdf(b"Adaptation goals\x0cWater sector".to_vec())),
        ])
    }

    #[tokio::test]
    async fn three_row_scenario() {
        let server = scenario_server();
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);

        let outcome = pipeline.refresh(RefreshOptions::default()).await.unwrap();

        assert_eq!(outcome.store.len(), 3);
        let with_text: Vec<_> = outcome.store.iter().filter(|r| r.pdf_text().is_some()).collect();
        assert_eq!(with_text.len(), 1);
        assert_eq!(with_text[0].country_name, "Kenya");
        assert_eq!(with_text[0].pdf_pages(), Some(2));
        assert_eq!(with_text[0].pdf_text(), Some("Adaptation goals\n\nWater sector"));

        let chad = outcome.store.get_by_slug("chad").unwrap();
        assert_eq!(chad.pdf_link, None);
        assert_eq!(chad.state, RecordState::NotStarted);

        let peru = outcome.store.get_by_slug("peru").unwrap();
        assert!(!peru.pdf_download_success());
        assert_eq!(server.hits("/files/peru.pdf"), 3);

        assert!(outcome.summary.to_string().starts_with("1/3 processed"));
        assert_eq!(outcome.download.requests, 4);
        assert_eq!(outcome.extract.succeeded, 1);
        assert_eq!(outcome.published, 3);
    }

    #[tokio::test]
    async fn get_cached_serves_published_dataset_offline() {
        let cache = TempDir::new().unwrap();
        let config = {
            let server = scenario_server();
            let pipeline = pipeline(&server, &cache);
            pipeline.refresh(RefreshOptions::default()).await.unwrap();
            pipeline.config().clone()
        };

        let records = get_cached(&config).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].country_name, "Kenya");
        assert!(records[0].pdf_text().is_some());
    }

    #[tokio::test]
    async fn extracted_only_filter_limits_published_records() {
        let server = scenario_server();
        let cache = TempDir::new().unwrap();
        let mut config = PipelineConfig::with_cache_dir(cache.path());
        config.fetch = fast_config(server.url("/naps"));
        config.publish = PublishFilter::ExtractedOnly;
        let pipeline = Pipeline::with_decoder(config.clone(), Arc::new(FormFeedDecoder)).unwrap();

        let outcome = pipeline.refresh(RefreshOptions::default()).await.unwrap();
        assert_eq!(outcome.published, 1);
        assert_eq!(get_cached(&config).unwrap().len(), 1);
    }

    #[test]
    fn get_cached_without_artifact_is_cache_missing() {
        let cache = TempDir::new().unwrap();
        let config = PipelineConfig::with_cache_dir(cache.path());
        let err = get_cached(&config).unwrap_err();
        assert!(matches!(err, PipelineError::CacheMissing(_)));
    }

    #[tokio::test]
    async fn second_refresh_downloads_nothing() {
        let html = table(&[
            row("1", "Kenya", &english("/files/kenya.pdf")),
            row("2", "Chad", ""),
        ]);
        let server = TestServer::start(vec![
            ("/naps", Route::html(&html)),
            ("/files/kenya.pdf", Route::pdf(b"one\x0ctwo".to_vec())),
        ]);
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);
        let force_scrape = RefreshOptions {
            force_scrape: true,
            ..RefreshOptions::default()
        };

        let first = pipeline.refresh(force_scrape).await.unwrap();
        let second = pipeline.refresh(force_scrape).await.unwrap();

        assert_eq!(server.hits("/naps"), 2);
        assert_eq!(server.hits("/files/kenya.pdf"), 1);
        assert_eq!(second.download.requests, 0);
        assert_eq!(second.extract.attempted, 0);
        assert_eq!(first.store, second.store);
    }

    #[tokio::test]
    async fn cached_store_skips_table_fetch() {
        let server = scenario_server();
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);

        pipeline.refresh(RefreshOptions::default()).await.unwrap();
        let second = pipeline.refresh(RefreshOptions::default()).await.unwrap();

        assert!(second.scrape.is_none());
        assert_eq!(server.hits("/naps"), 1);
    }

    #[tokio::test]
    async fn resumes_after_interruption() {
        let html = table(&[
            row("1", "Kenya", &english("/files/kenya.pdf")),
            row("2", "Nepal", &english("/files/nepal.pdf")),
            row("3", "Fiji", &english("/files/fiji.pdf")),
        ]);
        let server = TestServer::start(vec![
            ("/naps", Route::html(&html)),
            ("/files/kenya.pdf", Route::pdf(b"k".to_vec())),
            ("/files/nepal.pdf", Route::pdf(b"n".to_vec())),
            ("/files/fiji.pdf", Route::pdf(b"f".to_vec())),
        ]);
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);

        // A run that got as far as downloading the first record.
        let config = pipeline.config();
        let mut store = RecordStore::new();
        store.merge_scraped(extract_records(&html).unwrap().records);
        let kenya_pdf = config.pdf_dir().join("kenya.pdf");
        std::fs::create_dir_all(config.pdf_dir()).unwrap();
        std::fs::write(&kenya_pdf, b"k").unwrap();
        store.update(0, |r| r.mark_downloaded(&kenya_pdf, 1));
        snapshot::save(&store, &config.snapshot_path()).unwrap();

        let outcome = pipeline.refresh(RefreshOptions::default()).await.unwrap();

        assert_eq!(server.hits("/naps"), 0);
        assert_eq!(server.hits("/files/kenya.pdf"), 0);
        assert_eq!(server.hits("/files/nepal.pdf"), 1);
        assert_eq!(server.hits("/files/fiji.pdf"), 1);
        assert_eq!(outcome.summary.extracted, 3);
    }

    #[tokio::test]
    async fn malformed_row_is_dropped_and_rest_processed() {
        let html = table(&[
            row("1", "Kenya", &english("/files/kenya.pdf")),
            "<tr><td>2</td><td>Chad</td><td>Africa</td><td>LDC</td></tr>".to_string(),
            row("3", "Nepal", &english("/files/nepal.pdf")),
        ]);
        let server = TestServer::start(vec![
            ("/naps", Route::html(&html)),
            ("/files/kenya.pdf", Route::pdf(b"k".to_vec())),
            ("/files/nepal.pdf", Route::pdf(b"n".to_vec())),
        ]);
        let cache = TempDir::new().unwrap();
        let outcome = pipeline(&server, &cache)
            .refresh(RefreshOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.store.len(), 2);
        assert_eq!(outcome.scrape.unwrap().skipped.len(), 1);
        assert_eq!(outcome.summary.extracted, 2);
    }

    #[tokio::test]
    async fn force_download_fetches_again() {
        let server = scenario_server();
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);

        pipeline.refresh(RefreshOptions::default()).await.unwrap();
        let forced = RefreshOptions {
            force_download: true,
            ..RefreshOptions::default()
        };
        pipeline.refresh(forced).await.unwrap();
        assert_eq!(server.hits("/files/kenya.pdf"), 2);
    }

    #[tokio::test]
    async fn unreachable_table_is_connection_failed() {
        let server = TestServer::start(vec![("/naps", Route::status(503))]);
        let cache = TempDir::new().unwrap();
        let err = pipeline(&server, &cache)
            .refresh(RefreshOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ConnectionFailed(_)));
        assert_eq!(server.hits("/naps"), 3);
    }

    #[tokio::test]
    async fn changed_layout_is_structure_not_found() {
        let server = TestServer::start(vec![(
            "/naps",
            Route::html("<html><body><div class=\"cards\"></div></body></html>"),
        )]);
        let cache = TempDir::new().unwrap();
        let err = pipeline(&server, &cache)
            .refresh(RefreshOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StructureNotFound(_)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cache = TempDir::new().unwrap();
        let mut config = PipelineConfig::with_cache_dir(cache.path());
        config.fetch.max_attempts = 0;
        assert!(matches!(
            Pipeline::new(config),
            Err(PipelineError::Config(ConfigError::ZeroAttempts))
        ));
    }

    #[tokio::test]
    async fn clear_cache_removes_everything() {
        let server = scenario_server();
        let cache = TempDir::new().unwrap();
        let pipeline = pipeline(&server, &cache);
        pipeline.refresh(RefreshOptions::default()).await.unwrap();

        let report = clear_cache(pipeline.config(), true).unwrap();
        assert!(report.snapshot_removed);
        assert!(report.published_removed);
        assert_eq!(report.pdfs_removed, 1);
        assert!(matches!(
            load_snapshot(pipeline.config()),
            Err(PipelineError::CacheMissing(_))
        ));
        assert!(!pipeline.config().pdf_dir().exists());
    }
}
