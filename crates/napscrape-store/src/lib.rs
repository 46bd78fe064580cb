//! Storage layer: ordered record store, JSON snapshots, and the published dataset.

mod error;
pub use error::StoreError;

mod record_store;
pub use record_store::{MergeReport, RecordStore, Upsert};

pub mod snapshot;
pub use snapshot::{CachePaths, ClearReport, clear, load, load_or_default, publish, read_published, save};
