//! Sequential PDF download pass over the record store.
//!
//! One request in flight at a time. Per-record failures are recorded on the
//! record and never abort the pass; only a failed checkpoint does.

use std::path::{Path, PathBuf};

use napscrape_core::{DownloadConfig, NapRecord, RecordState};
use napscrape_store::{RecordStore, StoreError};
use tracing::{debug, info, warn};

use crate::client::{PoliteClient, retry};

/// Counters for one download pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Records a download was attempted for.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Already on disk and verified; no request made.
    pub skipped_existing: usize,
    pub no_link: usize,
    /// Records whose recorded download had vanished from disk.
    pub stale_reset: usize,
    /// Forced re-downloads that failed; the earlier result was kept.
    pub kept_previous: usize,
    /// HTTP requests issued, retries included.
    pub requests: u32,
}

/// What to do with one record.
#[derive(Debug, PartialEq, Eq)]
enum Plan {
    NoLink,
    Keep,
    Stale,
    Fetch,
}

/// Downloads every pending PDF into `pdf_dir`, one at a time.
pub struct DownloadManager<'a> {
    client: &'a PoliteClient,
    pdf_dir: PathBuf,
    config: DownloadConfig,
}

impl<'a> DownloadManager<'a> {
    pub fn new(client: &'a PoliteClient, pdf_dir: impl Into<PathBuf>, config: DownloadConfig) -> Self {
        Self {
            client,
            pdf_dir: pdf_dir.into(),
            config,
        }
    }

    /// Local path for a record's PDF.
    pub fn pdf_path(&self, record: &NapRecord) -> PathBuf {
        self.pdf_dir.join(record.pdf_file_name())
    }

    /// Download every record that needs it, in store order.
    ///
    /// `checkpoint` is called after every `persist_every` successful downloads
    /// and once more at the end if anything changed since the last call.
    pub async fn run<F>(&self, store: &mut RecordStore, mut checkpoint: F) -> Result<DownloadReport, StoreError>
    where
        F: FnMut(&RecordStore) -> Result<(), StoreError>,
    {
        let mut report = DownloadReport::default();
        let mut since_checkpoint = 0usize;
        let mut unsaved = false;

        for idx in 0..store.len() {
            let Some(record) = store.get(idx) else { break };
            let dest = self.pdf_path(record);
            let plan = self.plan(record, &dest).await;
            let country = record.country_name.clone();
            let link = record.pdf_link.clone();
            let had_success = record.pdf_download_success();
            let was_extracted = matches!(record.state, RecordState::Extracted { .. });

            match plan {
                Plan::NoLink => {
                    report.no_link += 1;
                    continue;
                }
                Plan::Keep => {
                    debug!(country = %country, "PDF already on disk, skipping");
                    report.skipped_existing += 1;
                    continue;
                }
                Plan::Stale => {
                    warn!(country = %country, path = %dest.display(), "downloaded PDF is missing, fetching again");
                    store.update(idx, NapRecord::reset);
                    report.stale_reset += 1;
                }
                Plan::Fetch => {}
            }
            let Some(link) = link else { continue };

            report.attempted += 1;
            store.update(idx, |r| r.pdf_path = Some(dest.clone()));
            unsaved = true;

            let url = match self.client.resolve(&link) {
                Ok(url) => url,
                Err(e) => {
                    warn!(country = %country, link = %link, error = %e, "unusable PDF link");
                    store.update(idx, |r| r.mark_download_failed(0, format!("invalid link: {e}")));
                    report.failed += 1;
                    continue;
                }
            };

            debug!(country = %country, url = %url, "downloading PDF");
            let (result, attempts) =
                retry(self.client.config(), url.as_str(), || self.client.download_to(&url, &dest)).await;
            report.requests += attempts;

            match result {
                Ok(bytes) => {
                    info!(country = %country, bytes, attempts, "PDF downloaded");
                    store.update(idx, |r| r.mark_downloaded(&dest, bytes));
                    report.succeeded += 1;
                    since_checkpoint += 1;
                    if since_checkpoint >= self.config.persist_every.max(1) {
                        checkpoint(store)?;
                        since_checkpoint = 0;
                        unsaved = false;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    // A failed forced re-download must not discard a usable PDF or its text.
                    let keep = had_success && (was_extracted || is_nonempty_file(&dest).await);
                    if keep {
                        warn!(country = %country, url = %url, attempts, error = %e, "re-download failed, keeping previous result");
                        report.kept_previous += 1;
                    } else {
                        warn!(country = %country, url = %url, attempts, error = %e, "download failed");
                        store.update(idx, |r| r.mark_download_failed(attempts, e.to_string()));
                    }
                }
            }
        }

        if unsaved {
            checkpoint(store)?;
        }
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped_existing,
            requests = report.requests,
            "download pass finished"
        );
        Ok(report)
    }

    async fn plan(&self, record: &NapRecord, dest: &Path) -> Plan {
        if record.pdf_link.is_none() {
            return Plan::NoLink;
        }
        if !self.config.skip_existing || !record.pdf_download_success() {
            return Plan::Fetch;
        }
        if is_nonempty_file(dest).await {
            return Plan::Keep;
        }
        // Extracted text survives the PDF being deleted.
        match record.state {
            RecordState::Extracted { .. } => Plan::Keep,
            _ => Plan::Stale,
        }
    }
}

async fn is_nonempty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.is_file() && m.len() > 0)
}
