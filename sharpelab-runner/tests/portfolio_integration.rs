//! End-to-end portfolio search over a scripted provider: metadata, cache,
//! gate, search and allocation wired together against a temp data dir.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use sharpelab_core::clock::ManualClock;
use sharpelab_core::data::{DataError, MarketDataProvider};
use sharpelab_core::domain::{Bar, InstrumentRecord, Resolution, Series};
use sharpelab_runner::{optimize_portfolio, PortfolioRequest, SearchError, SharpeConfig};

struct ScriptedProvider {
    candle_calls: AtomicUsize,
}

/// (ticker, sector, currency, drift, shock frequency)
const BOOK: &[(&str, &str, &str, f64, f64)] = &[
    ("AAA", "it", "rub", 0.0010, 0.9),
    ("BBB", "it", "rub", 0.0006, 1.7),
    ("CCC", "it", "rub", 0.0004, 2.3),
    ("DDD", "it", "rub", 0.0008, 3.1),
    ("TWIN", "it", "rub", 0.0010, 0.9),
    ("EEE", "energy", "usd", 0.0010, 1.1),
];

impl MarketDataProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn list_shares(&self) -> Result<Vec<InstrumentRecord>, DataError> {
        Ok(BOOK
            .iter()
            .map(|(t, s, c, _, _)| InstrumentRecord {
                ticker: t.to_string(),
                instrument_id: format!("FIGI_{t}"),
                sector: s.to_string(),
                currency: c.to_string(),
            })
            .collect())
    }

    fn fetch_candles(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _resolution: Resolution,
    ) -> Result<Series, DataError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        let ticker = instrument_id.trim_start_matches("FIGI_");
        let (_, _, _, drift, freq) = BOOK
            .iter()
            .find(|b| b.0 == ticker)
            .copied()
            .ok_or_else(|| DataError::acquisition(instrument_id, "unknown figi"))?;
        let days = (to - from).num_days();
        let mut p = 100.0;
        Ok((0..days)
            .map(|d| {
                if d > 0 {
                    p *= (drift + 0.015 * (d as f64 * freq).sin()).exp();
                }
                Bar {
                    time: from + chrono::Duration::days(d),
                    open: p,
                    high: p * 1.01,
                    low: p * 0.99,
                    close: p,
                    volume: 100,
                }
            })
            .collect())
    }
}

fn config(dir: &std::path::Path) -> SharpeConfig {
    let mut config = SharpeConfig::default();
    config.data.data_dir = dir.to_path_buf();
    config.history.lookback_days = 200;
    config.search.seed = Some(5);
    config
}

fn request(tickers: &[&str], share_limit: usize) -> PortfolioRequest {
    PortfolioRequest {
        available_capital: 100_000.0,
        sector: None,
        tickers: Some(tickers.iter().map(|s| s.to_string()).collect()),
        share_limit,
        max_portion: 0.7,
        currency: "rub".into(),
    }
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 10, 0, 0).unwrap())
}

#[test]
fn sector_search_produces_ranked_allocation() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider { candle_calls: AtomicUsize::new(0) };
    let req = PortfolioRequest {
        sector: Some("it".into()),
        tickers: None,
        ..request(&[], 3)
    };

    let report = optimize_portfolio(&req, &config(dir.path()), &provider, &clock(), None).unwrap();

    assert_eq!(report.universe, vec!["AAA", "BBB", "CCC", "DDD", "TWIN"]);
    assert!(!report.ranked.is_empty());
    for pair in report.ranked.windows(2) {
        assert!(pair[0].sharpe >= pair[1].sharpe);
    }
    let best = report.best().unwrap();
    assert_eq!(best.tickers.len(), 3);
    assert!((best.weights.iter().sum::<f64>() - 1.0).abs() <= 1e-6);
    assert_eq!(report.allocation.positions.len(), 3);
    assert!(report.allocation.total_cost > 0.0);

    // AAA and TWIN share a price path: every subset holding both is degenerate.
    assert_eq!(report.search.degenerate, 3);
    assert!(report
        .ranked
        .iter()
        .all(|c| !(c.tickers.contains(&"AAA".to_string()) && c.tickers.contains(&"TWIN".to_string()))));

    let acq = report.acquisition.as_ref().unwrap();
    assert_eq!(acq.fetched, 5);
    assert_eq!(acq.cached, 0);
}

#[test]
fn second_run_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider { candle_calls: AtomicUsize::new(0) };
    let clock = clock();
    let cfg = config(dir.path());
    let req = request(&["AAA", "BBB", "CCC"], 2);

    let first = optimize_portfolio(&req, &cfg, &provider, &clock, None).unwrap();
    let second = optimize_portfolio(&req, &cfg, &provider, &clock, None).unwrap();

    assert_eq!(provider.candle_calls.load(Ordering::SeqCst), 3);
    assert_eq!(second.acquisition.as_ref().unwrap().cached, 3);
    assert_eq!(first.ranked, second.ranked);
    assert_eq!(first.search.evaluated, 3);
}

#[test]
fn other_currency_tickers_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider { candle_calls: AtomicUsize::new(0) };
    let report = optimize_portfolio(
        &request(&["aaa", "BBB", "EEE"], 2),
        &config(dir.path()),
        &provider,
        &clock(),
        None,
    )
    .unwrap();
    assert_eq!(report.universe, vec!["AAA", "BBB"]);
}

#[test]
fn share_limit_above_universe_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider { candle_calls: AtomicUsize::new(0) };
    let err = optimize_portfolio(
        &request(&["AAA", "BBB"], 3),
        &config(dir.path()),
        &provider,
        &clock(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::Data(DataError::InvalidSelection(_))));
}

#[test]
fn only_degenerate_subsets_means_no_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider { candle_calls: AtomicUsize::new(0) };
    let err = optimize_portfolio(
        &request(&["AAA", "TWIN"], 2),
        &config(dir.path()),
        &provider,
        &clock(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SearchError::NoCandidates));
}
