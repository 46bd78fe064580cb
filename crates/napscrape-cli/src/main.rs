mod display;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use napscrape_core::{ExtractMode, PipelineConfig, PublishFilter, RunSummary, default_cache_dir};
use napscrape_pipeline::{
    Pipeline, PipelineError, RefreshOptions, clear_cache, get_cached, load_snapshot,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "napscrape",
    version,
    about = "Scrape National Adaptation Plan submissions, download their PDFs, and extract the text"
)]
struct Cli {
    /// Directory holding the snapshot, the published dataset, and the PDFs
    #[arg(long, global = true, env = "NAPSCRAPE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Log at debug level (otherwise RUST_LOG, default info)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape the table, download pending PDFs, extract text, and publish
    Refresh(RefreshArgs),
    /// Summarise the published dataset without touching the network
    Cached {
        /// Print the records as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// List every record in the working snapshot with its state
    Status,
    /// Print one record as a card
    Show {
        /// Country name, case-insensitive
        country: String,
    },
    /// Delete the snapshot and published dataset
    Clear {
        /// Also delete downloaded PDFs
        #[arg(long)]
        pdfs: bool,
    },
}

#[derive(Args, Debug)]
struct RefreshArgs {
    /// Fetch the table even if cached records exist
    #[arg(long)]
    force_scrape: bool,

    /// Download every PDF again
    #[arg(long)]
    force_download: bool,

    /// Extract text with a bounded worker pool, chunk by chunk
    #[arg(long)]
    parallel: bool,

    /// Serve the published dataset if the submissions page is unreachable
    #[arg(long)]
    fallback_to_cache: bool,

    /// Submissions page URL
    #[arg(long, env = "NAPSCRAPE_TABLE_URL")]
    table_url: Option<String>,

    #[arg(long, env = "NAPSCRAPE_USER_AGENT")]
    user_agent: Option<String>,

    /// Seconds to wait before every request
    #[arg(long, env = "NAPSCRAPE_DELAY_SECS")]
    delay_secs: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long, env = "NAPSCRAPE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[arg(long, env = "NAPSCRAPE_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Backoff base in seconds; attempt n (n >= 2) waits base * 2^(n-1)
    #[arg(long, env = "NAPSCRAPE_BACKOFF_SECS")]
    backoff_secs: Option<f64>,

    /// Ignore the system HTTP(S)_PROXY settings
    #[arg(long)]
    no_proxy: bool,

    /// Re-download PDFs already on disk
    #[arg(long)]
    no_skip_existing: bool,

    /// Save the snapshot after this many successful downloads
    #[arg(long, env = "NAPSCRAPE_PERSIST_EVERY")]
    persist_every: Option<usize>,

    /// Records per extraction chunk in parallel mode
    #[arg(long, env = "NAPSCRAPE_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Upper bound on extraction workers
    #[arg(long, env = "NAPSCRAPE_WORKERS")]
    workers: Option<usize>,

    /// Give up on a single PDF after this many seconds
    #[arg(long, env = "NAPSCRAPE_DOC_TIMEOUT_SECS")]
    doc_timeout_secs: Option<u64>,

    /// Publish only records with extracted text
    #[arg(long)]
    extracted_only: bool,
}

impl RefreshArgs {
    fn apply(&self, config: &mut PipelineConfig) -> anyhow::Result<()> {
        let fetch = &mut config.fetch;
        if let Some(url) = &self.table_url {
            fetch.table_url = url.clone();
        }
        if let Some(ua) = &self.user_agent {
            fetch.user_agent = ua.clone();
        }
        if let Some(secs) = self.delay_secs {
            fetch.request_delay = seconds("--delay-secs", secs)?;
        }
        if let Some(secs) = self.timeout_secs {
            fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = self.max_attempts {
            fetch.max_attempts = n;
        }
        if let Some(secs) = self.backoff_secs {
            fetch.base_backoff = seconds("--backoff-secs", secs)?;
        }
        if self.no_proxy {
            fetch.use_system_proxy = false;
        }

        if self.no_skip_existing {
            config.download.skip_existing = false;
        }
        if let Some(n) = self.persist_every {
            config.download.persist_every = n;
        }

        let extract = &mut config.extract;
        if self.parallel {
            extract.mode = ExtractMode::Parallel;
        }
        if let Some(n) = self.chunk_size {
            extract.chunk_size = n;
        }
        if let Some(n) = self.workers {
            extract.worker_cap = n;
        }
        if let Some(secs) = self.doc_timeout_secs {
            extract.document_timeout = Duration::from_secs(secs);
        }

        if self.extracted_only {
            config.publish = PublishFilter::ExtractedOnly;
        }
        Ok(())
    }
}

fn seconds(flag: &str, secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{flag} must be a non-negative number, got {secs}"))
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!("napscrape v{}", env!("CARGO_PKG_VERSION"));

    let mut config = PipelineConfig::with_cache_dir(cli.cache_dir.unwrap_or_else(default_cache_dir));

    match cli.command {
        Command::Refresh(args) => {
            args.apply(&mut config)?;
            refresh(config, &args).await?;
        }
        Command::Cached { json } => {
            let records = get_cached(&config).context("reading the published dataset")?;
            if json {
                let stdout = std::io::stdout().lock();
                serde_json::to_writer_pretty(stdout, &records).context("writing JSON")?;
                println!();
            } else {
                println!("{}", display::summary_block(&RunSummary::from_records(&records)));
            }
        }
        Command::Status => {
            let store = load_snapshot(&config).context("reading the working snapshot")?;
            print!("{}", display::status_table(&store));
            println!();
        }
        Command::Show { country } => {
            let store = load_snapshot(&config).context("reading the working snapshot")?;
            let Some(record) = store.find_country(&country) else {
                bail!("no record for {country:?} in {}", config.snapshot_path().display());
            };
            print!("{}", display::record_card(record));
        }
        Command::Clear { pdfs } => {
            let report = clear_cache(&config, pdfs).context("clearing the cache")?;
            println!("{}", display::clear_report(&report));
        }
    }
    Ok(())
}

async fn refresh(config: PipelineConfig, args: &RefreshArgs) -> anyhow::Result<()> {
    let cache_dir = config.cache_dir.clone();
    let pipeline = Pipeline::new(config.clone()).context("invalid configuration")?;
    let options = RefreshOptions {
        force_scrape: args.force_scrape,
        force_download: args.force_download,
    };

    match pipeline.refresh(options).await {
        Ok(outcome) => {
            println!("{}", display::summary_block(&outcome.summary));
            println!(
                "\nDownloads: {} ok, {} failed, {} already on disk ({} requests)",
                outcome.download.succeeded,
                outcome.download.failed,
                outcome.download.skipped_existing,
                outcome.download.requests
            );
            println!(
                "Cache: {} ({} records published)",
                cache_dir.display(),
                outcome.published
            );
            Ok(())
        }
        Err(PipelineError::ConnectionFailed(e)) if args.fallback_to_cache => {
            tracing::warn!(error = %e, "refresh failed, serving the published dataset");
            let records = get_cached(&config).context("no published dataset to fall back on")?;
            println!("{}", display::summary_block(&RunSummary::from_records(&records)));
            Ok(())
        }
        Err(e) => Err(e).context("refresh failed"),
    }
}
