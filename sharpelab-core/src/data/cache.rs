//! Historical series cache with per-resolution expiry.
//!
//! Layout: `{cache_dir}/ticker={TICKER}/{resolution}-{lookback_days}.parquet`
//! plus a `{resolution}-{lookback_days}.meta.json` sidecar.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Embedded `created_at` per entry; expiry is decided from it, never from
//!   filesystem timestamps
//! - Integrity validation on load (schema check, row count and BLAKE3 hash
//!   match the sidecar)
//! - Candles failing the OHLC sanity check are dropped before they are stored
//! - Quarantine for corrupt files ({filename}.quarantined)
//!
//! An entry is either absent or the full lookback window as of `created_at`.
//! Expired entries are not deleted; the next `get` overwrites them.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::metadata::InstrumentMetadata;
use super::provider::{DataError, MarketDataProvider};
use crate::clock::Clock;
use crate::domain::{Bar, Resolution, Series};

/// Cache key: one series per (ticker, resolution, lookback window).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub ticker: String,
    pub resolution: Resolution,
    pub lookback_days: u32,
}

impl SeriesKey {
    pub fn new(ticker: impl Into<String>, resolution: Resolution, lookback_days: u32) -> Self {
        Self {
            ticker: ticker.into(),
            resolution,
            lookback_days,
        }
    }

    fn stem(&self) -> String {
        format!("{}-{}", self.resolution.as_str(), self.lookback_days)
    }
}

/// Metadata sidecar for a cached series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub key: SeriesKey,
    pub created_at: DateTime<Utc>,
    pub bar_count: usize,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub data_hash: String,
    pub source: String,
}

/// Expiry threshold, in whole days since creation, per resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryPolicy {
    pub hourly: i64,
    pub daily: i64,
    pub fifteen_minute: i64,
    pub one_minute: i64,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            hourly: 1,
            daily: 1,
            fifteen_minute: 0,
            one_minute: 0,
        }
    }
}

impl ExpiryPolicy {
    pub fn threshold_days(&self, resolution: Resolution) -> i64 {
        match resolution {
            Resolution::Hourly => self.hourly,
            Resolution::Daily => self.daily,
            Resolution::FifteenMinute => self.fifteen_minute,
            Resolution::OneMinute => self.one_minute,
        }
    }

    /// An entry is fresh while its age in whole days is at most the threshold.
    pub fn is_expired(&self, meta: &CacheMeta, now: DateTime<Utc>) -> bool {
        (now - meta.created_at).num_days() > self.threshold_days(meta.key.resolution)
    }
}

/// Parquet + JSON sidecar storage for series. Knows nothing about expiry.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    cache_dir: PathBuf,
}

impl ParquetStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the store.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory for a ticker: `{cache_dir}/ticker={TICKER}/`
    fn ticker_dir(&self, ticker: &str) -> PathBuf {
        self.cache_dir.join(format!("ticker={ticker}"))
    }

    fn data_path(&self, key: &SeriesKey) -> PathBuf {
        self.ticker_dir(&key.ticker)
            .join(format!("{}.parquet", key.stem()))
    }

    fn meta_path(&self, key: &SeriesKey) -> PathBuf {
        self.ticker_dir(&key.ticker)
            .join(format!("{}.meta.json", key.stem()))
    }

    /// Write a full series and its sidecar. The sidecar is written last, so
    /// a crash mid-write leaves the previous entry (or none) visible.
    pub fn write(
        &self,
        key: &SeriesKey,
        bars: &[Bar],
        created_at: DateTime<Utc>,
        source: &str,
    ) -> Result<CacheMeta, DataError> {
        let dir = self.ticker_dir(&key.ticker);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::Cache(format!("failed to create dir: {e}")))?;

        let data_path = self.data_path(key);
        if bars.is_empty() {
            let _ = fs::remove_file(&data_path);
        } else {
            let mut df = bars_to_dataframe(bars)?;
            let tmp_path = data_path.with_extension("parquet.tmp");
            write_parquet(&mut df, &tmp_path)?;
            fs::rename(&tmp_path, &data_path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::Cache(format!("atomic rename failed: {e}"))
            })?;
        }

        let meta = CacheMeta {
            key: key.clone(),
            created_at,
            bar_count: bars.len(),
            first_time: bars.first().map(|b| b.time),
            last_time: bars.last().map(|b| b.time),
            data_hash: series_hash(bars)?,
            source: source.to_string(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::Cache(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(key);
        let tmp_meta = meta_path.with_extension("json.tmp");
        fs::write(&tmp_meta, meta_json)
            .map_err(|e| DataError::Cache(format!("meta write: {e}")))?;
        fs::rename(&tmp_meta, &meta_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_meta);
            DataError::Cache(format!("atomic rename failed: {e}"))
        })?;

        Ok(meta)
    }

    /// Read the sidecar for a key, if present and parseable.
    pub fn get_meta(&self, key: &SeriesKey) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(key)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Load a cached series, ascending by time.
    ///
    /// A Parquet file that fails validation is quarantined and reported as an
    /// error, which callers treat as a miss.
    pub fn load(&self, meta: &CacheMeta) -> Result<Series, DataError> {
        if meta.bar_count == 0 {
            return Ok(Vec::new());
        }

        let path = self.data_path(&meta.key);
        match load_and_validate_parquet(&path, meta) {
            Ok(mut bars) => {
                bars.sort_by_key(|b| b.time);
                Ok(bars)
            }
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), "quarantining corrupt cache file: {e}");
                let _ = fs::rename(&path, &quarantine);
                Err(e)
            }
        }
    }

    /// Every readable sidecar in the store, sorted by key.
    pub fn entries(&self) -> Vec<CacheMeta> {
        let mut metas = Vec::new();
        let Ok(dirs) = fs::read_dir(&self.cache_dir) else {
            return metas;
        };

        for dir in dirs.flatten() {
            let name = dir.file_name().to_string_lossy().to_string();
            if !name.starts_with("ticker=") {
                continue;
            }
            let Ok(files) = fs::read_dir(dir.path()) else {
                continue;
            };
            for file in files.flatten() {
                let fname = file.file_name().to_string_lossy().to_string();
                if !fname.ends_with(".meta.json") {
                    continue;
                }
                if let Some(meta) = fs::read_to_string(file.path())
                    .ok()
                    .and_then(|c| serde_json::from_str::<CacheMeta>(&c).ok())
                {
                    metas.push(meta);
                }
            }
        }

        metas.sort_by(|a, b| {
            (&a.key.ticker, a.key.resolution, a.key.lookback_days).cmp(&(
                &b.key.ticker,
                b.key.resolution,
                b.key.lookback_days,
            ))
        });
        metas
    }
}

/// Cache status for a single entry.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub key: SeriesKey,
    pub created_at: DateTime<Utc>,
    pub age_days: i64,
    pub bar_count: usize,
    pub expired: bool,
}

/// Expiry-aware read-through cache in front of a market-data provider.
pub struct HistoricalCache<'a> {
    store: ParquetStore,
    metadata: &'a InstrumentMetadata,
    provider: &'a dyn MarketDataProvider,
    clock: &'a dyn Clock,
    expiry: ExpiryPolicy,
}

impl<'a> HistoricalCache<'a> {
    pub fn new(
        store: ParquetStore,
        metadata: &'a InstrumentMetadata,
        provider: &'a dyn MarketDataProvider,
        clock: &'a dyn Clock,
        expiry: ExpiryPolicy,
    ) -> Self {
        Self {
            store,
            metadata,
            provider,
            clock,
            expiry,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    /// Fetch a series, from cache when a fresh entry exists.
    ///
    /// Returns the series and whether it was a cache hit. A miss means the
    /// provider was called and quota was consumed.
    pub fn get(
        &self,
        ticker: &str,
        resolution: Resolution,
        lookback_days: u32,
        force_refresh: bool,
    ) -> Result<(Series, bool), DataError> {
        let instrument_id = self.metadata.instrument_id(ticker)?;
        let key = SeriesKey::new(ticker, resolution, lookback_days);

        if !force_refresh {
            if let Some(bars) = self.fresh_entry(&key) {
                debug!(ticker, %resolution, lookback_days, "cache hit");
                return Ok((bars, true));
            }
        }

        let now = self.clock.now();
        let from = now - Duration::days(i64::from(lookback_days));
        debug!(ticker, %resolution, lookback_days, force_refresh, "acquiring series");

        let mut bars = self
            .provider
            .fetch_candles(instrument_id, from, now, resolution)
            .map_err(|e| match e {
                DataError::Acquisition { reason, .. } => DataError::Acquisition {
                    context: format!("{ticker} {resolution} {lookback_days}d"),
                    reason,
                },
                other => other,
            })?;
        bars.sort_by_key(|b| b.time);
        bars.dedup_by_key(|b| b.time);
        let received = bars.len();
        bars.retain(Bar::is_sane);
        if bars.len() < received {
            warn!(ticker, %resolution, dropped = received - bars.len(), "dropping malformed candles");
        }

        self.store.write(&key, &bars, now, self.provider.name())?;
        Ok((bars, false))
    }

    fn fresh_entry(&self, key: &SeriesKey) -> Option<Series> {
        let meta = self.store.get_meta(key)?;
        if self.expiry.is_expired(&meta, self.clock.now()) {
            debug!(ticker = %key.ticker, created_at = %meta.created_at, "cache entry expired");
            return None;
        }
        self.store.load(&meta).ok()
    }

    /// Status of every entry in the store, relative to the clock.
    pub fn status(&self) -> Vec<CacheStatus> {
        status_of(&self.store, &self.expiry, self.clock)
    }
}

/// Status of every entry in a store. Does not need metadata or a provider.
pub fn status_of(store: &ParquetStore, expiry: &ExpiryPolicy, clock: &dyn Clock) -> Vec<CacheStatus> {
    let now = clock.now();
    store
        .entries()
        .into_iter()
        .map(|meta| CacheStatus {
            age_days: (now - meta.created_at).num_days(),
            expired: expiry.is_expired(&meta, now),
            created_at: meta.created_at,
            bar_count: meta.bar_count,
            key: meta.key,
        })
        .collect()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, DataError> {
    let times: Vec<i64> = bars.iter().map(|b| b.time.timestamp_millis()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("time_ms".into(), times),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// BLAKE3 over the JSON encoding of the bars, in stored order.
fn series_hash(bars: &[Bar]) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(bars)
        .map_err(|e| DataError::Cache(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn load_and_validate_parquet(path: &Path, meta: &CacheMeta) -> Result<Series, DataError> {
    let expected_rows = meta.bar_count;
    let file = fs::File::open(path).map_err(|e| DataError::Parquet(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read: {e}")))?;

    if df.height() != expected_rows {
        return Err(DataError::Cache(format!(
            "row count {} does not match sidecar ({expected_rows})",
            df.height()
        )));
    }

    for col_name in ["time_ms", "open", "high", "low", "close", "volume"] {
        if df.column(col_name).is_err() {
            return Err(DataError::Cache(format!("missing column '{col_name}'")));
        }
    }

    let bars = dataframe_to_bars(&df)?;
    let hash = series_hash(&bars)?;
    if hash != meta.data_hash {
        return Err(DataError::Cache(format!(
            "data hash {hash} does not match sidecar ({})",
            meta.data_hash
        )));
    }
    Ok(bars)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Series, DataError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::Parquet(format!("column read: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| {
        DataError::Parquet(format!("{name} column type: {e}"))
    };

    let time_ca = col("time_ms")?.i64().map_err(|e| type_err("time_ms", e))?;
    let open_ca = col("open")?.f64().map_err(|e| type_err("open", e))?;
    let high_ca = col("high")?.f64().map_err(|e| type_err("high", e))?;
    let low_ca = col("low")?.f64().map_err(|e| type_err("low", e))?;
    let close_ca = col("close")?.f64().map_err(|e| type_err("close", e))?;
    let vol_ca = col("volume")?.u64().map_err(|e| type_err("volume", e))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let ms = time_ca
            .get(i)
            .ok_or_else(|| DataError::Parquet(format!("null time at row {i}")))?;
        let time = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::Parquet(format!("invalid time {ms} at row {i}")))?;

        bars.push(Bar {
            time,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(bars)
}
