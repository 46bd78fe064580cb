//! On-disk persistence: the working snapshot, the published dataset, and cache clearing.
//!
//! Every write goes to a temp file in the destination directory and is then
//! renamed over the target, so a crash mid-write leaves the previous file intact.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use napscrape_core::{NapRecord, PublishFilter};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{RecordStore, StoreError};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    saved_at: DateTime<Utc>,
    records: Vec<NapRecord>,
}

/// Serialize the whole store to `path`, replacing any previous snapshot.
pub fn save(store: &RecordStore, path: &Path) -> Result<(), StoreError> {
    let file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        saved_at: Utc::now(),
        records: store.records().to_vec(),
    };
    write_json_atomic(path, &file)?;
    debug!(path = %path.display(), records = store.len(), "snapshot saved");
    Ok(())
}

/// Load a snapshot. Fails with [`StoreError::CacheMissing`] if there is none.
pub fn load(path: &Path) -> Result<RecordStore, StoreError> {
    let file: SnapshotFile = read_json(path)?;
    if file.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(StoreError::UnsupportedFormat {
            found: file.format_version,
            expected: SNAPSHOT_FORMAT_VERSION,
        });
    }
    debug!(path = %path.display(), records = file.records.len(), saved_at = %file.saved_at, "snapshot loaded");
    Ok(RecordStore::from_records(file.records))
}

/// Load a snapshot, or start empty if none exists yet.
pub fn load_or_default(path: &Path) -> Result<RecordStore, StoreError> {
    match load(path) {
        Ok(store) => Ok(store),
        Err(StoreError::CacheMissing(_)) => Ok(RecordStore::new()),
        Err(e) => Err(e),
    }
}

/// Write the dataset artifact consumers read without refreshing.
///
/// Returns the number of records written.
pub fn publish(
    store: &RecordStore,
    path: &Path,
    filter: PublishFilter,
) -> Result<usize, StoreError> {
    let records: Vec<&NapRecord> = store
        .iter()
        .filter(|r| match filter {
            PublishFilter::All => true,
            PublishFilter::ExtractedOnly => r.pdf_text().is_some(),
        })
        .collect();
    write_json_atomic(path, &records)?;
    info!(path = %path.display(), records = records.len(), ?filter, "dataset published");
    Ok(records.len())
}

/// Read the published dataset. Fails with [`StoreError::CacheMissing`] if absent.
pub fn read_published(path: &Path) -> Result<Vec<NapRecord>, StoreError> {
    read_json(path)
}

/// Files and directories owned by one cache.
#[derive(Debug, Clone)]
pub struct CachePaths {
    pub snapshot: PathBuf,
    pub published: PathBuf,
    pub pdf_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub snapshot_removed: bool,
    pub published_removed: bool,
    pub pdfs_removed: usize,
}

/// Remove the snapshot and published dataset, and optionally every downloaded PDF.
///
/// The PDF directory is renamed aside before deletion, so it either vanishes
/// as a whole or stays untouched.
pub fn clear(paths: &CachePaths, also_remove_pdfs: bool) -> Result<ClearReport, StoreError> {
    let mut report = ClearReport {
        snapshot_removed: remove_if_exists(&paths.snapshot)?,
        published_removed: remove_if_exists(&paths.published)?,
        pdfs_removed: 0,
    };

    if also_remove_pdfs && paths.pdf_dir.is_dir() {
        report.pdfs_removed = count_pdfs(&paths.pdf_dir)?;
        let doomed = paths
            .pdf_dir
            .with_file_name(format!(".napscrape-clear-{}", std::process::id()));
        fs::rename(&paths.pdf_dir, &doomed).map_err(|e| StoreError::io(&paths.pdf_dir, e))?;
        fs::remove_dir_all(&doomed).map_err(|e| StoreError::io(&doomed, e))?;
    }

    info!(
        snapshot = report.snapshot_removed,
        published = report.published_removed,
        pdfs = report.pdfs_removed,
        "cache cleared"
    );
    Ok(report)
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn count_pdfs(dir: &Path) -> Result<usize, StoreError> {
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut n = 0;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "pdf") {
            n += 1;
        }
    }
    Ok(n)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::CacheMissing(path.to_path_buf()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_reader(BufReader::new(file)).map_err(|e| StoreError::json(path, e))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| StoreError::json(path, e))?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}
