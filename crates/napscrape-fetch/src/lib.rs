//! Network layer: the polite HTTP client, the submissions-table extractor,
//! and the sequential PDF download manager.

pub mod client;
pub use client::{DownloadError, FetchError, PoliteClient, retry};

pub mod table;
pub use table::{SkippedRow, TableError, TableScan, extract_records};

pub mod download;
pub use download::{DownloadManager, DownloadReport};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
