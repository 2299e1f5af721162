//! FxTick CLI: download FXCM weekly tick files into a local SQLite database.
//!
//! A single command. Without flags it resumes every ticker known to the
//! database from its newest stored tick up to the end of last month.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use fxtick_core::data::FxcmSource;
use fxtick_core::domain::Ticker;
use fxtick_core::store::{default_catalogue, load_catalogue, TickStore};
use fxtick_runner::{
    dispatch, last_day_of_previous_month, DispatchMode, IngestConfig, IngestSettings,
    IngestionJob, JobStatus, RunSummary,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fxtick",
    version,
    about = "Download FXCM tick data into a local SQLite database"
)]
struct Cli {
    /// Drop and recreate the database before running.
    #[arg(short = 'd', long = "db", default_value_t = false)]
    reset_db: bool,

    /// Run ticker jobs concurrently.
    #[arg(short = 'm', long = "mp", default_value_t = false)]
    parallel: bool,

    /// Tickers to ingest (e.g. EURUSD GBPUSD). Defaults to every ticker
    /// known to the database.
    #[arg(short = 't', long = "tk", num_args = 0..)]
    tickers: Vec<String>,

    /// First day to ingest (YYYY-MM-DD). Defaults to the data floor.
    #[arg(short = 's', long)]
    start_date: Option<String>,

    /// Last day to ingest (YYYY-MM-DD). Defaults to the end of last month.
    #[arg(short = 'e', long)]
    end_date: Option<String>,

    /// Database file. Overrides the config file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Worker pool size with --mp. Defaults to the number of CPUs.
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// CSV seeding the instrument catalogue on --db (first column = ticker).
    #[arg(long)]
    instruments: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let today = Utc::now().date_naive();

    let start = match cli.start_date.as_deref() {
        Some(raw) => parse_date(raw, "--start-date")?,
        None => config.source.data_floor,
    };
    let end = match cli.end_date.as_deref() {
        Some(raw) => parse_date(raw, "--end-date")?,
        None => last_day_of_previous_month(today),
    };
    let mut tickers = cli
        .tickers
        .iter()
        .map(|raw| Ticker::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let db_path = config.store.path.clone();
    let store_options = config.store_options();
    let mut store = TickStore::open(&db_path, &store_options)
        .with_context(|| format!("cannot open database {}", db_path.display()))?;

    if cli.reset_db {
        let catalogue = match &config.store.instruments_csv {
            Some(path) => load_catalogue(path)?,
            None => default_catalogue(),
        };
        store.reset(&catalogue)?;
        for (table, rows) in store.table_counts()? {
            info!(table = %table, rows, "table ready");
        }
    }

    if tickers.is_empty() {
        tickers = store.known_tickers()?.into_iter().collect();
    }
    if tickers.is_empty() {
        warn!("no tickers to ingest: pass --tk or seed the catalogue with --db");
        return Ok(());
    }
    drop(store);

    let source = FxcmSource::new(config.fxcm_options())?;
    let settings = IngestSettings::from_config(&config, today, !cli.reset_db);
    let jobs = IngestionJob::for_tickers(&tickers, start, end);
    let mode = if cli.parallel {
        DispatchMode::Parallel {
            workers: config.worker_count(),
        }
    } else {
        DispatchMode::Sequential
    };

    let summary = dispatch(
        &jobs,
        &source,
        || TickStore::open(&db_path, &store_options),
        &settings,
        mode,
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if !summary.all_succeeded() {
        for (ticker, err) in summary.failures() {
            eprintln!("Error for {ticker}: {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = match &cli.config {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => IngestConfig::default(),
    };
    if let Some(path) = &cli.db_path {
        config.store.path = path.clone();
    }
    if let Some(path) = &cli.instruments {
        config.store.instruments_csv = Some(path.clone());
    }
    if cli.workers.is_some() {
        config.dispatch.workers = cli.workers;
    }
    config.validate()?;
    Ok(config)
}

fn parse_date(raw: &str, flag: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Ok(date),
        Err(e) => bail!("invalid {flag} '{raw}' (expected YYYY-MM-DD): {e}"),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{:<10} {:>7} {:>7} {:>11} {:>6} {:>10} {:>9}  Status",
        "Ticker", "Fetched", "Skipped", "Unpublished", "Failed", "Rows", "Malformed"
    );
    for r in &summary.reports {
        let status = match &r.status {
            JobStatus::Completed => "completed".to_string(),
            JobStatus::StoppedAtUnpublished { period } => format!("stopped at {period}"),
            JobStatus::Failed { .. } => "FAILED".to_string(),
        };
        println!(
            "{:<10} {:>7} {:>7} {:>11} {:>6} {:>10} {:>9}  {status}",
            r.ticker.as_str(),
            r.periods_fetched,
            r.periods_skipped,
            r.periods_unpublished,
            r.periods_failed,
            r.rows_inserted,
            r.rows_malformed,
        );
    }

    let t = &summary.totals;
    let elapsed = summary.finished_at - summary.started_at;
    println!();
    println!(
        "{} tickers ({} failed), {} periods fetched, {} rows written in {:.1}s",
        t.tickers,
        t.tickers_failed,
        t.periods_fetched,
        t.rows_inserted,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
}
