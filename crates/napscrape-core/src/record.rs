//! The NAP submission record and its processing state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One link found in a row's language column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageLink {
    pub label: String,
    pub href: String,
}

/// Pipeline stage at which a record last failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Download,
    Extraction,
}

/// Where a record is in the scrape → download → extract lifecycle.
///
/// This is the single source of truth for the PDF-related fields; the
/// `pdf_download_success` / `pdf_pages` / `pdf_text` views are derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordState {
    /// Scraped, no successful download yet.
    NotStarted,
    /// PDF on disk, text not yet extracted.
    Downloaded { bytes: u64 },
    /// Text extracted.
    Extracted { pages: u32, text: String },
    /// Last attempt at `stage` failed. A failed extraction still has its PDF on disk.
    Failed {
        stage: FailureStage,
        attempts: u32,
        reason: String,
    },
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Downloaded { .. } => "downloaded",
            Self::Extracted { .. } => "extracted",
            Self::Failed {
                stage: FailureStage::Download,
                ..
            } => "download_failed",
            Self::Failed {
                stage: FailureStage::Extraction,
                ..
            } => "extraction_failed",
        }
    }
}

/// One row of the NAP dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NapRecord {
    /// Short identifier as published; not guaranteed unique.
    pub nap_id: String,
    pub country_name: String,
    /// Filesystem-safe key derived from `country_name`, disambiguated on collision.
    pub slug: String,
    pub region: String,
    pub ldc_sids_marker: String,
    /// Raw text of the language column.
    pub language_options: String,
    /// Every link found in the language column, in document order.
    pub language_links: Vec<LanguageLink>,
    /// Date as printed on the site; not normalised.
    pub date_posted: String,
    /// Selected (English) PDF link, absolute or site-relative.
    pub pdf_link: Option<String>,
    /// Local PDF location, set once a download has been planned.
    pub pdf_path: Option<PathBuf>,
    pub state: RecordState,
}

impl NapRecord {
    /// Create a freshly scraped record with empty metadata and no PDF state.
    pub fn new(country_name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            nap_id: String::new(),
            country_name: country_name.into(),
            slug: slug.into(),
            region: String::new(),
            ldc_sids_marker: String::new(),
            language_options: String::new(),
            language_links: Vec::new(),
            date_posted: String::new(),
            pdf_link: None,
            pdf_path: None,
            state: RecordState::NotStarted,
        }
    }

    /// File name the PDF is stored under.
    pub fn pdf_file_name(&self) -> String {
        format!("{}.pdf", self.slug)
    }

    /// True once a non-empty PDF has been verified on disk.
    pub fn pdf_download_success(&self) -> bool {
        matches!(
            self.state,
            RecordState::Downloaded { .. }
                | RecordState::Extracted { .. }
                | RecordState::Failed {
                    stage: FailureStage::Extraction,
                    ..
                }
        )
    }

    pub fn pdf_pages(&self) -> Option<u32> {
        match &self.state {
            RecordState::Extracted { pages, .. } => Some(*pages),
            _ => None,
        }
    }

    pub fn pdf_text(&self) -> Option<&str> {
        match &self.state {
            RecordState::Extracted { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Has a link and no successful download.
    pub fn is_download_pending(&self) -> bool {
        self.pdf_link.is_some() && !self.pdf_download_success()
    }

    /// Has a PDF on disk whose text has not been extracted.
    pub fn is_extraction_pending(&self) -> bool {
        matches!(
            self.state,
            RecordState::Downloaded { .. }
                | RecordState::Failed {
                    stage: FailureStage::Extraction,
                    ..
                }
        )
    }

    /// Number of failed attempts recorded for `stage`, zero otherwise.
    pub fn failed_attempts(&self, stage: FailureStage) -> u32 {
        match &self.state {
            RecordState::Failed {
                stage: s, attempts, ..
            } if *s == stage => *attempts,
            _ => 0,
        }
    }

    pub fn mark_downloaded(&mut self, path: &Path, bytes: u64) {
        self.pdf_path = Some(path.to_path_buf());
        self.state = RecordState::Downloaded { bytes };
    }

    pub fn mark_download_failed(&mut self, attempts: u32, reason: impl Into<String>) {
        self.state = RecordState::Failed {
            stage: FailureStage::Download,
            attempts,
            reason: reason.into(),
        };
    }

    pub fn mark_extracted(&mut self, pages: u32, text: String) {
        self.state = RecordState::Extracted { pages, text };
    }

    /// Record an extraction failure, accumulating attempts across runs.
    pub fn mark_extraction_failed(&mut self, reason: impl Into<String>) {
        let attempts = self.failed_attempts(FailureStage::Extraction) + 1;
        self.state = RecordState::Failed {
            stage: FailureStage::Extraction,
            attempts,
            reason: reason.into(),
        };
    }

    /// Forget all PDF progress, e.g. after the file vanished or the link changed.
    pub fn reset(&mut self) {
        self.state = RecordState::NotStarted;
    }
}
