//! SharpeLab CLI: portfolio optimization, history download, metadata and cache commands.
//!
//! Commands:
//! - `optimize`: pick the best-Sharpe subset of a sector or ticker list and size it in shares
//! - `download`: fetch and cache price history through the acquisition gate
//! - `metadata`: show sectors and currencies from the instrument snapshot
//! - `report`: print a report saved with `optimize --save`
//! - `cache status`: list cached series with age and expiry state

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sharpelab_core::clock::{Clock, SystemClock};
use sharpelab_core::data::{
    status_of, AcquisitionGate, HistoricalCache, InstrumentMetadata, MetadataStore, ParquetStore,
    StderrProgress, TinkoffProvider,
};
use sharpelab_core::domain::Resolution;
use sharpelab_runner::export::{
    export_allocation_csv, export_json, read_report, write_ranked_csv, write_report,
};
use sharpelab_runner::{optimize_portfolio, PortfolioReport, PortfolioRequest, SharpeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sharpelab",
    about = "SharpeLab CLI: maximum-Sharpe share portfolios from Tinkoff Invest data"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides `data.data_dir`).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Tinkoff Invest API token.
    #[arg(long, global = true, env = "TINKOFF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for the best portfolio and allocate capital across it.
    Optimize {
        /// Capital to allocate, in the selection currency.
        #[arg(long)]
        capital: f64,

        /// Sector to draw tickers from (e.g. it, energy, financial).
        #[arg(long, conflicts_with = "tickers")]
        sector: Option<String>,

        /// Comma-separated ticker list.
        #[arg(long, value_delimiter = ',')]
        tickers: Option<Vec<String>>,

        /// Tickers per portfolio.
        #[arg(long, default_value_t = 3)]
        share_limit: usize,

        /// Largest weight any single ticker may take.
        #[arg(long, default_value_t = 0.7)]
        max_portion: f64,

        /// Only tickers traded in this currency are considered.
        #[arg(long, default_value = "rub")]
        currency: String,

        /// Seed for shard shuffles (overrides `search.seed`).
        #[arg(long)]
        seed: Option<u64>,

        /// Search passes (overrides `search.passes`).
        #[arg(long)]
        passes: Option<usize>,

        /// Write the ranked list as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Save the full report as JSON for the `report` command.
        #[arg(long)]
        save: Option<PathBuf>,

        /// Print the full report as JSON instead of tables.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Ranked candidates to print.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Download price history into the cache.
    Download {
        /// Tickers to download (e.g. SBER GAZP YNDX).
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Lookback window in days (overrides `history.lookback_days`).
        #[arg(long)]
        days: Option<u32>,

        /// Candle resolution: 1h, 1d, 15m, 1m (overrides `history.resolution`).
        #[arg(long)]
        resolution: Option<Resolution>,

        /// Re-download even if a fresh cache entry exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show sectors and currencies from the instrument snapshot.
    Metadata {
        /// Re-download the snapshot even if it is fresh.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Print a saved report.
    Report {
        /// Path written by `optimize --save`.
        path: PathBuf,

        /// Ranked candidates to print.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Write the ranked list as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached series with age and expiry state.
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SharpeConfig::from_file(path)?,
        None => SharpeConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data.data_dir = dir;
    }
    let token = cli.token;

    match cli.command {
        Commands::Optimize {
            capital,
            sector,
            tickers,
            share_limit,
            max_portion,
            currency,
            seed,
            passes,
            csv,
            save,
            json,
            top,
        } => {
            if seed.is_some() {
                config.search.seed = seed;
            }
            if passes.is_some() {
                config.search.passes = passes;
            }
            config.validate()?;
            let request = PortfolioRequest {
                available_capital: capital,
                sector,
                tickers,
                share_limit,
                max_portion,
                currency,
            };
            let output = Output { csv, save, json, top };
            run_optimize(&config, token, &request, &output)
        }
        Commands::Download {
            tickers,
            days,
            resolution,
            force,
        } => run_download(&config, token, tickers, days, resolution, force),
        Commands::Metadata { refresh } => run_metadata(&config, token, refresh),
        Commands::Report { path, top, csv } => run_report(&path, top, csv),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
        },
    }
}

fn provider(token: Option<String>) -> Result<TinkoffProvider> {
    let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
        bail!("a Tinkoff Invest token is required: pass --token or set TINKOFF_TOKEN");
    };
    Ok(TinkoffProvider::new(token)?)
}

/// Where `optimize` sends its results.
struct Output {
    csv: Option<PathBuf>,
    save: Option<PathBuf>,
    json: bool,
    top: usize,
}

fn run_optimize(
    config: &SharpeConfig,
    token: Option<String>,
    request: &PortfolioRequest,
    output: &Output,
) -> Result<()> {
    let provider = provider(token)?;
    let progress = StderrProgress;
    let report = optimize_portfolio(request, config, &provider, &SystemClock, Some(&progress))?;

    if let Some(path) = &output.csv {
        write_ranked_csv(&report.ranked, path)?;
        info!(path = %path.display(), "ranked candidates written");
    }
    if let Some(path) = &output.save {
        write_report(&report, path)?;
        info!(path = %path.display(), "report saved");
    }

    if output.json {
        println!("{}", export_json(&report)?);
    } else {
        print_report(&report, output.top)?;
    }
    Ok(())
}

fn run_report(path: &Path, top: usize, csv: Option<PathBuf>) -> Result<()> {
    let report = read_report(path)?;
    if let Some(csv_path) = csv {
        write_ranked_csv(&report.ranked, &csv_path)?;
        info!(path = %csv_path.display(), "ranked candidates written");
    }
    print_report(&report, top)
}

fn run_download(
    config: &SharpeConfig,
    token: Option<String>,
    tickers: Vec<String>,
    days: Option<u32>,
    resolution: Option<Resolution>,
    force: bool,
) -> Result<()> {
    let provider = provider(token)?;
    let clock = SystemClock;
    let metadata = MetadataStore::new(config.data.metadata_path(), config.data.metadata_expiry_days)
        .refresh_if_expired(&provider, &clock)?;

    let days = days.unwrap_or(config.history.lookback_days);
    let resolution = resolution.unwrap_or(config.history.resolution);
    let mut tickers: Vec<String> = tickers.iter().map(|t| t.trim().to_uppercase()).collect();
    tickers.sort();
    tickers.dedup();

    let cache = HistoricalCache::new(
        ParquetStore::new(config.data.series_dir()),
        &metadata,
        &provider,
        &clock,
        config.data.expiry_days,
    );
    let progress = StderrProgress;
    let batch = AcquisitionGate::new(&cache, config.gate)
        .with_force_refresh(force)
        .with_progress(&progress)
        .get_batch(&tickers, days, resolution)?;

    println!();
    println!("=== Download ===");
    println!("Resolution:     {resolution} over {days} days");
    println!("Pacing:         {:?}", batch.plan.strategy);
    println!("Fetched:        {}", batch.fetched);
    println!("From cache:     {}", batch.cached);
    println!("Cooldowns:      {}", batch.cooldowns);
    println!();
    println!("{:<10} {:>8} {:<12} {:<12}", "Ticker", "Bars", "First", "Last");
    println!("{}", "-".repeat(46));
    for (ticker, (bars, _)) in &batch.series {
        let first = bars.first().map(|b| b.date().to_string()).unwrap_or_default();
        let last = bars.last().map(|b| b.date().to_string()).unwrap_or_default();
        println!("{:<10} {:>8} {:<12} {:<12}", ticker, bars.len(), first, last);
    }
    Ok(())
}

fn run_metadata(config: &SharpeConfig, token: Option<String>, refresh: bool) -> Result<()> {
    let clock = SystemClock;
    let store = MetadataStore::new(config.data.metadata_path(), config.data.metadata_expiry_days);

    let fresh = store
        .load_snapshot()
        .filter(|s| !refresh && !store.is_expired(s, &clock));
    let (metadata, created_at) = match fresh {
        Some(snapshot) => (
            InstrumentMetadata::from_records(&snapshot.instruments),
            snapshot.created_at,
        ),
        None => {
            let provider = provider(token)?;
            let metadata = store.refresh(&provider, &clock)?;
            (metadata, clock.now())
        }
    };

    println!("Snapshot:       {}", store.path().display());
    println!("Created:        {}", created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("Instruments:    {}", metadata.len());
    println!();
    println!("{:<20} {:>8}", "Sector", "Tickers");
    println!("{}", "-".repeat(29));
    for sector in metadata.sector_names() {
        let count = metadata.sector_tickers(sector).map_or(0, |s| s.len());
        println!("{:<20} {:>8}", sector, count);
    }
    println!();
    println!("{:<20} {:>8}", "Currency", "Tickers");
    println!("{}", "-".repeat(29));
    for currency in metadata.currencies() {
        let count = metadata.currency_tickers(currency).map_or(0, |s| s.len());
        println!("{:<20} {:>8}", currency, count);
    }
    Ok(())
}

fn run_cache_status(config: &SharpeConfig) -> Result<()> {
    let dir = config.data.series_dir();
    if !dir.exists() {
        println!("Cache directory does not exist: {}", dir.display());
        return Ok(());
    }

    let mut rows = status_of(&ParquetStore::new(&dir), &config.data.expiry_days, &SystemClock);
    if rows.is_empty() {
        println!("Cache is empty: {}", dir.display());
        return Ok(());
    }
    rows.sort_by(|a, b| {
        (&a.key.ticker, a.key.resolution, a.key.lookback_days).cmp(&(
            &b.key.ticker,
            b.key.resolution,
            b.key.lookback_days,
        ))
    });

    println!("Cache: {}", dir.display());
    println!("Entries: {}", rows.len());
    println!();
    println!(
        "{:<10} {:<5} {:>6} {:>8} {:>8}  {}",
        "Ticker", "Res", "Days", "Bars", "Age (d)", "State"
    );
    println!("{}", "-".repeat(50));
    for row in &rows {
        println!(
            "{:<10} {:<5} {:>6} {:>8} {:>8}  {}",
            row.key.ticker,
            row.key.resolution.as_str(),
            row.key.lookback_days,
            row.bar_count,
            row.age_days,
            if row.expired { "expired" } else { "fresh" }
        );
    }
    Ok(())
}

fn print_report(report: &PortfolioReport, top: usize) -> Result<()> {
    let best = report.best().context("report has no candidates")?;

    println!();
    println!("=== Best Portfolio ===");
    println!("Universe:       {} tickers", report.universe.len());
    println!("Tickers:        {}", best.tickers.join(", "));
    println!(
        "Weights:        {}",
        best.display_weights()
            .iter()
            .map(|w| format!("{w:.3}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Sharpe:         {:.5}", best.sharpe);
    println!("Ann. Return:    {:.2}%", best.annualized_return * 100.0);
    println!("Ann. Vol:       {:.2}%", best.annualized_volatility * 100.0);

    println!();
    println!("--- Allocation ---");
    print!("{}", export_allocation_csv(&report.allocation)?.replace(',', "\t"));
    println!("Total cost:     {:.2}", report.allocation.total_cost);
    println!("Leftover:       {:.2}", report.allocation.leftover);

    println!();
    println!("--- Top {} of {} ---", top.min(report.ranked.len()), report.ranked.len());
    for (i, c) in report.ranked.iter().take(top).enumerate() {
        println!("{:>3}. {:<30} sharpe {:>9.5}", i + 1, c.tickers.join(","), c.sharpe);
    }

    let s = &report.search;
    println!();
    println!("--- Search ---");
    println!("Seed:           {}", s.seed);
    println!("Passes:         {} (shards {:?})", s.passes, s.shards_per_pass);
    println!("Evaluated:      {}", s.evaluated);
    println!("Degenerate:     {}", s.degenerate);
    println!("Duplicates:     {}", s.duplicates);
    if let Some(a) = &report.acquisition {
        println!(
            "History:        {} x {}d, {} fetched, {} cached, {} cooldowns",
            a.resolution, a.lookback_days, a.fetched, a.cached, a.cooldowns
        );
    }
    println!();
    Ok(())
}
