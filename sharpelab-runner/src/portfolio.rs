//! Portfolio entry point: wires metadata, cache, gate, search and aggregation.
//!
//! Two entry points:
//! - `optimize_portfolio()`: resolves the selection and acquires prices, then searches. Used by the CLI.
//! - `optimize_from_matrix()`: takes an already aligned price matrix. No I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sharpelab_core::clock::Clock;
use sharpelab_core::data::{
    AcquisitionGate, DownloadProgress, HistoricalCache, MarketDataProvider, MetadataStore,
    PacingStrategy, ParquetStore, PriceMatrix,
};
use sharpelab_core::domain::Resolution;
use tracing::info;

use crate::aggregator::{Allocation, Candidate};
use crate::config::SharpeConfig;
use crate::error::SearchError;
use crate::search::{run_search, SearchParams, SearchStats};

/// Current schema version for exported reports.
pub const SCHEMA_VERSION: u32 = 1;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRequest {
    pub available_capital: f64,
    pub sector: Option<String>,
    pub tickers: Option<Vec<String>>,
    /// Number of tickers per candidate portfolio.
    pub share_limit: usize,
    /// Upper bound on any single weight.
    pub max_portion: f64,
    pub currency: String,
}

impl PortfolioRequest {
    pub fn validate(&self) -> Result<(), SearchError> {
        if !(self.available_capital.is_finite() && self.available_capital > 0.0) {
            return Err(SearchError::InvalidConfig(format!(
                "available capital must be positive, got {}",
                self.available_capital
            )));
        }
        if self.share_limit < 2 {
            return Err(SearchError::InvalidConfig(format!(
                "share limit must be at least 2, got {}",
                self.share_limit
            )));
        }
        if !(self.max_portion > 0.0 && self.max_portion <= 1.0) {
            return Err(SearchError::InvalidConfig(format!(
                "max portion must be in (0, 1], got {}",
                self.max_portion
            )));
        }
        if (self.share_limit as f64) * self.max_portion < 1.0 - 1e-12 {
            return Err(SearchError::InvalidConfig(format!(
                "{} shares capped at {} cannot hold the whole capital",
                self.share_limit, self.max_portion
            )));
        }
        Ok(())
    }
}

/// How the price history was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSummary {
    pub resolution: Resolution,
    pub lookback_days: u32,
    pub strategy: PacingStrategy,
    pub fetched: usize,
    pub cached: usize,
    pub cooldowns: usize,
}

/// Ranked candidates plus the allocation of the best one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub schema_version: u32,
    pub request: PortfolioRequest,
    pub universe: Vec<String>,
    pub ranked: Vec<Candidate>,
    pub allocation: Allocation,
    pub search: SearchStats,
    pub acquisition: Option<AcquisitionSummary>,
}

impl PortfolioReport {
    pub fn best(&self) -> Option<&Candidate> {
        self.ranked.first()
    }
}

/// Resolve the selection, acquire its history and search it.
pub fn optimize_portfolio(
    request: &PortfolioRequest,
    config: &SharpeConfig,
    provider: &dyn MarketDataProvider,
    clock: &dyn Clock,
    progress: Option<&dyn DownloadProgress>,
) -> Result<PortfolioReport, SearchError> {
    request.validate()?;

    let metadata = MetadataStore::new(config.data.metadata_path(), config.data.metadata_expiry_days)
        .refresh_if_expired(provider, clock)?;
    let universe: Vec<String> = metadata
        .resolve(
            request.tickers.as_deref(),
            request.sector.as_deref(),
            &request.currency,
        )?
        .into_iter()
        .collect();
    info!(tickers = universe.len(), currency = %request.currency, "resolved selection");

    let cache = HistoricalCache::new(
        ParquetStore::new(config.data.series_dir()),
        &metadata,
        provider,
        clock,
        config.data.expiry_days,
    );
    let mut gate = AcquisitionGate::new(&cache, config.gate);
    if let Some(p) = progress {
        gate = gate.with_progress(p);
    }
    let history = config.history;
    let batch = gate.get_batch(&universe, history.lookback_days, history.resolution)?;

    let matrix = PriceMatrix::from_series(
        batch
            .series
            .iter()
            .map(|(ticker, (bars, _))| (ticker.as_str(), bars.as_slice())),
    );
    let mut report = optimize_from_matrix(request, &matrix, config)?;
    report.acquisition = Some(AcquisitionSummary {
        resolution: history.resolution,
        lookback_days: history.lookback_days,
        strategy: batch.plan.strategy,
        fetched: batch.fetched,
        cached: batch.cached,
        cooldowns: batch.cooldowns,
    });
    Ok(report)
}

/// Search a pre-built price matrix. No I/O.
pub fn optimize_from_matrix(
    request: &PortfolioRequest,
    matrix: &PriceMatrix,
    config: &SharpeConfig,
) -> Result<PortfolioReport, SearchError> {
    request.validate()?;
    let params = SearchParams::from_config(&config.search, request.share_limit, request.max_portion);
    let (results, stats) = run_search(matrix, &params)?;

    let latest: HashMap<String, f64> = matrix
        .tickers
        .iter()
        .zip(matrix.latest_prices())
        .filter_map(|(t, p)| p.map(|p| (t.clone(), p)))
        .collect();
    let final_results = results.finalize(request.available_capital, &latest)?;

    if let Some(best) = final_results.ranked.first() {
        info!(
            tickers = ?best.tickers,
            sharpe = best.sharpe,
            candidates = final_results.ranked.len(),
            "best portfolio"
        );
    }

    Ok(PortfolioReport {
        schema_version: SCHEMA_VERSION,
        request: request.clone(),
        universe: matrix.tickers.clone(),
        ranked: final_results.ranked,
        allocation: final_results.allocation,
        search: stats,
        acquisition: None,
    })
}
