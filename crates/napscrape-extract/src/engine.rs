//! Extraction pass over the record store.
//!
//! Eligible records are split into chunks. Each chunk is decoded by a pool of
//! at most `worker_count()` blocking workers that see only their own file;
//! results are merged into the store after the whole chunk has finished, then
//! the store is checkpointed. Sequential mode is the same loop with chunks of
//! one and a single worker.
//!
//! A worker slot is held by the blocking decode itself, not by the task
//! awaiting it. A decode that outlives its timeout keeps its slot until the
//! decoder returns, so hung documents never push the number of live decoder
//! threads past `worker_count()`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use napscrape_core::{ExtractConfig, NapRecord};
use napscrape_store::{RecordStore, StoreError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::decoder::{ExtractError, PdfDecoder};

/// Page count and joined text of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub pages: u32,
    pub text: String,
}

/// Outcome for the record at `index`, produced by a worker.
#[derive(Debug)]
pub struct ExtractionResult {
    pub index: usize,
    pub outcome: Result<Extracted, ExtractError>,
}

impl ExtractionResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub pages: u64,
}

pub struct TextExtractor {
    decoder: Arc<dyn PdfDecoder>,
    config: ExtractConfig,
    /// Shared by every chunk and run of this extractor.
    slots: Arc<Semaphore>,
}

impl TextExtractor {
    pub fn new(decoder: Arc<dyn PdfDecoder>, config: ExtractConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.worker_count().max(1)));
        Self {
            decoder,
            config,
            slots,
        }
    }

    /// Extract text for every record with a downloaded, unextracted PDF.
    ///
    /// `checkpoint` runs after each merged chunk. Decode failures are recorded
    /// on the record; only a failed checkpoint ends the pass early.
    pub async fn run<F>(&self, store: &mut RecordStore, mut checkpoint: F) -> Result<ExtractReport, StoreError>
    where
        F: FnMut(&RecordStore) -> Result<(), StoreError>,
    {
        let pending = store.indices_where(NapRecord::is_extraction_pending);
        let chunk_size = self.config.effective_chunk_size();
        let workers = self.config.worker_count();
        let mut report = ExtractReport::default();

        if pending.is_empty() {
            debug!("nothing to extract");
            return Ok(report);
        }
        info!(
            records = pending.len(),
            chunk_size,
            workers,
            mode = ?self.config.mode,
            "extracting text"
        );

        for chunk in pending.chunks(chunk_size) {
            let jobs: Vec<(usize, Option<PathBuf>)> = chunk
                .iter()
                .filter_map(|&idx| store.get(idx).map(|r| (idx, r.pdf_path.clone())))
                .collect();
            let mut results = self.run_chunk(jobs).await;
            results.sort_by_key(|r| r.index);

            for result in results {
                report.attempted += 1;
                let country = store
                    .get(result.index)
                    .map(|r| r.country_name.clone())
                    .unwrap_or_default();
                match result.outcome {
                    Ok(Extracted { pages, text }) => {
                        debug!(country = %country, pages, chars = text.len(), "text extracted");
                        report.succeeded += 1;
                        report.pages += u64::from(pages);
                        store.update(result.index, |r| r.mark_extracted(pages, text));
                    }
                    Err(e) => {
                        warn!(country = %country, error = %e, "extraction failed");
                        report.failed += 1;
                        store.update(result.index, |r| r.mark_extraction_failed(e.to_string()));
                    }
                }
            }

            report.chunks += 1;
            checkpoint(store)?;
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            pages = report.pages,
            "extraction pass finished"
        );
        Ok(report)
    }

    /// Decode one chunk with at most `worker_count()` decodes alive.
    async fn run_chunk(&self, jobs: Vec<(usize, Option<PathBuf>)>) -> Vec<ExtractionResult> {
        let timeout = self.config.document_timeout;
        let mut set = JoinSet::new();

        for (index, path) in jobs {
            let decoder = Arc::clone(&self.decoder);
            let slots = Arc::clone(&self.slots);
            set.spawn(async move {
                let outcome = match (path, slots.acquire_owned().await) {
                    (Some(path), Ok(permit)) => extract_file(decoder, path, timeout, permit).await,
                    (None, _) => Err(ExtractError::MissingPath),
                    (Some(_), Err(e)) => Err(ExtractError::WorkerPanicked(e.to_string())),
                };
                ExtractionResult { index, outcome }
            });
        }

        let mut results = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                // The record stays pending and is retried on the next run.
                Err(e) => error!(error = %e, "extraction task failed"),
            }
        }
        results
    }
}

/// Read and decode one PDF on a blocking thread, bounded by `timeout`.
///
/// `permit` moves into the blocking closure and is released when the decoder
/// returns, even if the caller has already given up on it.
async fn extract_file(
    decoder: Arc<dyn PdfDecoder>,
    path: PathBuf,
    timeout: Duration,
    permit: OwnedSemaphorePermit,
) -> Result<Extracted, ExtractError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|source| ExtractError::Io { path, source })?;
    let task = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        decoder.decode(&bytes)
    });

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(ExtractError::Timeout(timeout)),
        Ok(Err(join)) => Err(ExtractError::WorkerPanicked(join.to_string())),
        Ok(Ok(decoded)) => decoded.map(|doc| Extracted {
            pages: doc.page_count(),
            text: doc.joined_text(),
        }),
    }
}
