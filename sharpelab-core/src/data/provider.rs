//! Market-data provider trait and structured error types.
//!
//! The MarketDataProvider trait abstracts over the remote source so the
//! metadata store and series cache can be driven by a mock in tests.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{InstrumentForm, InstrumentRecord, Resolution, Series};

/// Structured error types for data operations.
///
/// These are designed to be displayable in CLI output without further context.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error(
        "{form} '{value}' does not exist in the instrument metadata (only shares are supported)"
    )]
    UnknownInstrument { form: InstrumentForm, value: String },

    #[error("invalid resolution '{0}' (expected one of: 1h, 1d, 15m, 1m)")]
    InvalidResolution(String),

    #[error(
        "quota exceeded: ~{per_ticker:.0} {resolution} bars per ticker over {lookback_days} days \
         exceeds the quota of {quota} per window; reduce the lookback"
    )]
    QuotaExceeded {
        per_ticker: f64,
        quota: u64,
        resolution: Resolution,
        lookback_days: u32,
    },

    #[error("acquisition failed ({context}): {reason}")]
    Acquisition { context: String, reason: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl DataError {
    pub fn acquisition(context: impl Into<String>, reason: impl ToString) -> Self {
        DataError::Acquisition {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

/// Trait for remote market-data sources.
///
/// Implementations only talk to the remote side. Caching and pacing live
/// above this trait, so a provider never knows whether a call was necessary.
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// List every tradable share with its sector and currency.
    fn list_shares(&self) -> Result<Vec<InstrumentRecord>, DataError>;

    /// Fetch candles for an instrument over `[from, to]`, ascending by time.
    fn fetch_candles(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Series, DataError>;
}

/// Progress callback for batch acquisitions.
pub trait DownloadProgress: Send {
    /// Called when starting to fetch a ticker.
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// Called when a ticker completes; `Ok(true)` means it was served from cache.
    fn on_complete(&self, ticker: &str, index: usize, total: usize, result: Result<bool, &DataError>);

    /// Called before the gate blocks for a cooldown window.
    fn on_cooldown(&self, secs: u64);
}

/// Progress reporter that prints to stderr.
pub struct StderrProgress;

impl DownloadProgress for StderrProgress {
    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        eprintln!("[{}/{}] {ticker}...", index + 1, total);
    }

    fn on_complete(
        &self,
        ticker: &str,
        _index: usize,
        _total: usize,
        result: Result<bool, &DataError>,
    ) {
        match result {
            Ok(true) => eprintln!("  CACHED: {ticker}"),
            Ok(false) => eprintln!("  FETCHED: {ticker}"),
            Err(e) => eprintln!("  FAIL: {ticker}: {e}"),
        }
    }

    fn on_cooldown(&self, secs: u64) {
        eprintln!("  quota window full, waiting {secs}s");
    }
}
