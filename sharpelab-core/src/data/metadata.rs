//! Instrument metadata: ticker/instrument-id mapping plus sector and
//! currency groupings, persisted as a JSON snapshot with an embedded
//! creation time.
//!
//! The snapshot is loaded once per run. When it is missing, unreadable, or
//! older than the configured expiry, the full share list is fetched again and
//! the snapshot is replaced atomically (write to .tmp, rename into place).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::provider::{DataError, MarketDataProvider};
use crate::clock::Clock;
use crate::domain::{InstrumentForm, InstrumentRecord, InstrumentRef};

/// Immutable lookup tables built from one share listing.
#[derive(Debug, Clone, Default)]
pub struct InstrumentMetadata {
    ticker_to_id: BTreeMap<String, String>,
    id_to_ticker: BTreeMap<String, String>,
    sectors: BTreeMap<String, BTreeSet<String>>,
    currencies: BTreeMap<String, BTreeSet<String>>,
}

impl InstrumentMetadata {
    /// Build the lookup tables. The first record wins when a ticker or an
    /// instrument id repeats, which keeps the two maps a bijection.
    pub fn from_records(records: &[InstrumentRecord]) -> Self {
        let mut meta = Self::default();

        for rec in records {
            if meta.ticker_to_id.contains_key(&rec.ticker)
                || meta.id_to_ticker.contains_key(&rec.instrument_id)
            {
                debug!(ticker = %rec.ticker, id = %rec.instrument_id, "skipping duplicate listing");
                continue;
            }
            meta.ticker_to_id
                .insert(rec.ticker.clone(), rec.instrument_id.clone());
            meta.id_to_ticker
                .insert(rec.instrument_id.clone(), rec.ticker.clone());
            meta.sectors
                .entry(rec.sector.clone())
                .or_default()
                .insert(rec.ticker.clone());
            meta.currencies
                .entry(rec.currency.to_lowercase())
                .or_default()
                .insert(rec.ticker.clone());
        }

        meta
    }

    /// Resolve either form of instrument reference to its ticker.
    pub fn lookup(&self, reference: InstrumentRef<'_>) -> Result<&str, DataError> {
        let found = match reference {
            InstrumentRef::Ticker(t) => self.ticker_to_id.get_key_value(t).map(|(k, _)| k),
            InstrumentRef::InstrumentId(id) => self.id_to_ticker.get(id),
        };
        found
            .map(|s| s.as_str())
            .ok_or_else(|| DataError::UnknownInstrument {
                form: reference.form(),
                value: reference.value().to_string(),
            })
    }

    /// Instrument id for a ticker.
    pub fn instrument_id(&self, ticker: &str) -> Result<&str, DataError> {
        self.ticker_to_id
            .get(ticker)
            .map(|s| s.as_str())
            .ok_or_else(|| DataError::UnknownInstrument {
                form: InstrumentForm::Ticker,
                value: ticker.to_string(),
            })
    }

    /// Turn a ticker list or a sector name into the set of tickers traded in
    /// `currency`.
    ///
    /// Exactly one of `tickers` / `sector` must be given. Tickers that are
    /// not listed, or listed in another currency, are dropped. At least two
    /// tickers must survive the filter.
    pub fn resolve(
        &self,
        tickers: Option<&[String]>,
        sector: Option<&str>,
        currency: &str,
    ) -> Result<BTreeSet<String>, DataError> {
        let tickers = tickers.filter(|t| !t.is_empty());
        let candidates: BTreeSet<String> = match (tickers, sector) {
            (Some(_), Some(_)) => {
                return Err(DataError::InvalidSelection(
                    "give either a ticker list or a sector, not both".into(),
                ))
            }
            (None, None) => {
                return Err(DataError::InvalidSelection(
                    "no tickers or sector given".into(),
                ))
            }
            (Some(list), None) => list.iter().map(|t| t.trim().to_uppercase()).collect(),
            (None, Some(name)) => self
                .sectors
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    DataError::InvalidSelection(format!(
                        "unknown sector '{name}' (available: {})",
                        self.sector_names().join(", ")
                    ))
                })?,
        };

        let in_currency = self.currencies.get(&currency.to_lowercase());
        let selected: BTreeSet<String> = candidates
            .into_iter()
            .filter(|t| in_currency.is_some_and(|set| set.contains(t)))
            .collect();

        if selected.len() <= 1 {
            return Err(DataError::InvalidSelection(format!(
                "only {} ticker(s) trade in '{currency}' after filtering; need at least 2",
                selected.len()
            )));
        }

        Ok(selected)
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    pub fn sector_tickers(&self, sector: &str) -> Option<&BTreeSet<String>> {
        self.sectors.get(sector)
    }

    pub fn currency_tickers(&self, currency: &str) -> Option<&BTreeSet<String>> {
        self.currencies.get(&currency.to_lowercase())
    }

    pub fn currencies(&self) -> Vec<&str> {
        self.currencies.keys().map(|s| s.as_str()).collect()
    }

    /// Number of listed instruments.
    pub fn len(&self) -> usize {
        self.ticker_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticker_to_id.is_empty()
    }
}

/// On-disk form of the metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub instruments: Vec<InstrumentRecord>,
}

/// Persists and refreshes the metadata snapshot.
pub struct MetadataStore {
    path: PathBuf,
    expiry_days: i64,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>, expiry_days: i64) -> Self {
        Self {
            path: path.into(),
            expiry_days,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing or unreadable file is `None`.
    pub fn load_snapshot(&self) -> Option<MetadataSnapshot> {
        let content = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring corrupt metadata snapshot: {e}");
                None
            }
        }
    }

    /// A snapshot is expired once more than `expiry_days` whole days have passed.
    pub fn is_expired(&self, snapshot: &MetadataSnapshot, clock: &dyn Clock) -> bool {
        (clock.now() - snapshot.created_at).num_days() > self.expiry_days
    }

    /// Load the snapshot, re-fetching it first when absent or expired.
    pub fn refresh_if_expired(
        &self,
        provider: &dyn MarketDataProvider,
        clock: &dyn Clock,
    ) -> Result<InstrumentMetadata, DataError> {
        if let Some(snapshot) = self.load_snapshot() {
            if !self.is_expired(&snapshot, clock) {
                info!(
                    instruments = snapshot.instruments.len(),
                    created_at = %snapshot.created_at,
                    "loaded metadata snapshot"
                );
                return Ok(InstrumentMetadata::from_records(&snapshot.instruments));
            }
            info!(created_at = %snapshot.created_at, "metadata snapshot expired");
        }
        self.refresh(provider, clock)
    }

    /// Fetch the full share list and replace the snapshot.
    pub fn refresh(
        &self,
        provider: &dyn MarketDataProvider,
        clock: &dyn Clock,
    ) -> Result<InstrumentMetadata, DataError> {
        info!(provider = provider.name(), "downloading instrument metadata");
        let instruments = provider.list_shares()?;
        if instruments.is_empty() {
            return Err(DataError::acquisition(
                "share listing",
                "provider returned no instruments",
            ));
        }

        let snapshot = MetadataSnapshot {
            created_at: clock.now(),
            source: provider.name().to_string(),
            instruments,
        };
        self.write_snapshot(&snapshot)?;
        info!(instruments = snapshot.instruments.len(), "metadata snapshot written");

        Ok(InstrumentMetadata::from_records(&snapshot.instruments))
    }

    fn write_snapshot(&self, snapshot: &MetadataSnapshot) -> Result<(), DataError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DataError::Snapshot(format!("failed to create dir: {e}")))?;
        }
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| DataError::Snapshot(format!("serialization: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .map_err(|e| DataError::Snapshot(format!("write: {e}")))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::Snapshot(format!("atomic rename failed: {e}"))
        })
    }
}
