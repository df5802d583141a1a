use std::num::NonZeroU32;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use tracing::info;

use aqi_ingest::settings::parse_filter;
use aqi_ingest::{db, Fetcher, Filters, HttpSource, Ingestor, Settings};

#[derive(Parser)]
#[command(name = "aqi_ingest", about = "Air-quality observation ingester for the data.gov.in resource API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and raw log schema
    Init,
    /// Fetch every page from the API and append new observations to the raw log
    Run {
        /// Page size (overrides AQI_PAGE_LIMIT)
        #[arg(short = 'l', long)]
        limit: Option<NonZeroU32>,
        /// Stop after this many non-empty pages (overrides AQI_MAX_PAGES)
        #[arg(short = 'n', long)]
        max_pages: Option<NonZeroU32>,
        /// Pause between page requests in milliseconds (overrides AQI_POLITE_DELAY_MS)
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Server-side exact-match filter, e.g. --filter city=Delhi (repeatable)
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        /// Fetch and report without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// Show raw log statistics
    Stats,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load().context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Init => init(&settings),
        Commands::Run {
            limit,
            max_pages,
            delay_ms,
            filters,
            dry_run,
        } => {
            if let Some(limit) = limit {
                settings.page_limit = limit;
            }
            if max_pages.is_some() {
                settings.max_pages = max_pages;
            }
            if let Some(ms) = delay_ms {
                settings.polite_delay = Duration::from_millis(ms);
            }
            run(&settings, filters.into_iter().collect(), dry_run)
        }
        Commands::Stats => stats(&settings),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", HumanDuration(elapsed));
    }

    result
}

fn init(settings: &Settings) -> anyhow::Result<()> {
    open_log(&settings.database_path)?;
    println!("Raw log ready at {}", settings.database_path.display());
    Ok(())
}

fn run(settings: &Settings, filters: Filters, dry_run: bool) -> anyhow::Result<()> {
    info!(settings = ?settings, filters = ?filters, "Starting ingest");

    let source = HttpSource::new(settings)?;
    let fetcher = Fetcher::from_settings(source, settings, filters);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(format!("Fetching pages from {}", settings.resource_url()));
    pb.enable_steady_tick(Duration::from_millis(120));
    let fetched = fetcher.fetch_all();
    pb.finish_and_clear();
    let records = fetched.context("Fetching observations failed")?;

    if records.is_empty() {
        println!("No records returned from API.");
        return Ok(());
    }
    if dry_run {
        println!("Fetched: {} | Dry run, nothing inserted", records.len());
        return Ok(());
    }

    drop(open_log(&settings.database_path)?);
    let inserted = Ingestor::new(settings)
        .insert_raw(&records)
        .context("Inserting observations failed")?;
    println!("Fetched: {} | Inserted (dedup): {}", records.len(), inserted);
    Ok(())
}

fn stats(settings: &Settings) -> anyhow::Result<()> {
    let conn = open_log(&settings.database_path)?;
    let s = db::log_stats(&conn)?;
    println!("Database:        {}", settings.database_path.display());
    println!("Rows:            {}", s.rows);
    println!("Distinct hashes: {}", s.distinct_hashes);
    println!("First ingest:    {}", s.first_ingested.as_deref().unwrap_or("-"));
    println!("Last ingest:     {}", s.last_ingested.as_deref().unwrap_or("-"));
    Ok(())
}

/// Open the database, creating its directory and the raw log table if needed.
fn open_log(path: &Path) -> anyhow::Result<rusqlite::Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = db::connect(path).with_context(|| format!("Failed to open {}", path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}
