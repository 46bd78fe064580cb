pub mod config;
pub mod record;
pub mod slug;
pub mod summary;

pub use config::{
    ConfigError, DownloadConfig, ExtractConfig, ExtractMode, FetchConfig, PipelineConfig,
    PublishFilter, default_cache_dir,
};
pub use record::{FailureStage, LanguageLink, NapRecord, RecordState};
pub use slug::{SlugAllocator, country_slug};
pub use summary::{FailureNote, RunSummary};
