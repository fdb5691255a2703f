//! Acquisition gate: paces a batch of series acquisitions so the estimated
//! candle volume never exceeds the provider's per-window quota.
//!
//! The batch is classified once, up front, from the estimated load:
//!
//! | condition                         | strategy     |
//! |-----------------------------------|--------------|
//! | `per_ticker > Q`                  | rejected     |
//! | `total < Q`                       | Unthrottled  |
//! | `per_ticker > Q / 2`              | PerTicker    |
//! | otherwise                         | Windowed     |
//!
//! Only acquisitions that actually reached the provider count against the
//! quota; cache hits are free. All waiting goes through the injected
//! [`Clock`], so the delay schedule is a pure function of the quota, the
//! resolution, the ticker order and the hit/miss pattern.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cache::HistoricalCache;
use super::provider::{DataError, DownloadProgress};
use crate::clock::Clock;
use crate::domain::{Resolution, Series};

/// Quota settings for the remote provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Bar-equivalents the provider allows per window.
    pub quota_per_window: u64,
    pub window_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            quota_per_window: 15_000,
            window_secs: 60,
        }
    }
}

impl GateConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// How a batch is paced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacingStrategy {
    /// The whole batch fits in one window.
    Unthrottled,
    /// One ticker nearly fills a window: wait a full window after each acquisition.
    PerTicker,
    /// Accumulate acquisitions and wait whenever the window is close to full.
    Windowed,
}

/// Load estimate and chosen strategy for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingPlan {
    pub strategy: PacingStrategy,
    pub total_estimated_bars: u64,
    pub per_ticker: f64,
    pub quota: u64,
}

impl PacingPlan {
    /// Classify a batch of `ticker_count` series of `lookback_days` each.
    pub fn for_batch(
        quota: u64,
        resolution: Resolution,
        lookback_days: u32,
        ticker_count: usize,
    ) -> Result<Self, DataError> {
        if ticker_count == 0 {
            return Ok(Self {
                strategy: PacingStrategy::Unthrottled,
                total_estimated_bars: 0,
                per_ticker: 0.0,
                quota,
            });
        }

        let total_estimated_bars =
            (f64::from(lookback_days) * ticker_count as f64 * resolution.bars_per_day()).floor()
                as u64;
        let per_ticker = total_estimated_bars as f64 / ticker_count as f64;
        let q = quota as f64;

        if per_ticker > q {
            return Err(DataError::QuotaExceeded {
                per_ticker,
                quota,
                resolution,
                lookback_days,
            });
        }

        let strategy = if total_estimated_bars < quota {
            PacingStrategy::Unthrottled
        } else if per_ticker > q / 2.0 {
            PacingStrategy::PerTicker
        } else {
            PacingStrategy::Windowed
        };

        Ok(Self {
            strategy,
            total_estimated_bars,
            per_ticker,
            quota,
        })
    }

    /// Windowed batching waits before a ticker once the counter exceeds this.
    pub fn window_threshold(&self) -> f64 {
        self.quota as f64 - 2.0 * self.per_ticker
    }
}

/// Pacing state of the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateState {
    Idle,
    /// Estimated bars acquired in the current window.
    Accumulating { counter: f64 },
    CoolingDown { until: DateTime<Utc> },
}

/// Anything that can hand out a series and say whether it came from cache.
pub trait SeriesSource {
    fn fetch(
        &self,
        ticker: &str,
        resolution: Resolution,
        lookback_days: u32,
        force_refresh: bool,
    ) -> Result<(Series, bool), DataError>;

    fn clock(&self) -> &dyn Clock;
}

impl SeriesSource for HistoricalCache<'_> {
    fn fetch(
        &self,
        ticker: &str,
        resolution: Resolution,
        lookback_days: u32,
        force_refresh: bool,
    ) -> Result<(Series, bool), DataError> {
        self.get(ticker, resolution, lookback_days, force_refresh)
    }

    fn clock(&self) -> &dyn Clock {
        HistoricalCache::clock(self)
    }
}

/// Outcome of a paced batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Series and cache-hit flag per ticker.
    pub series: BTreeMap<String, (Series, bool)>,
    pub plan: PacingPlan,
    pub fetched: usize,
    pub cached: usize,
    pub cooldowns: usize,
}

/// Sequential, quota-aware batch downloader.
pub struct AcquisitionGate<'a> {
    source: &'a dyn SeriesSource,
    config: GateConfig,
    state: GateState,
    force_refresh: bool,
    progress: Option<&'a dyn DownloadProgress>,
}

impl<'a> AcquisitionGate<'a> {
    pub fn new(source: &'a dyn SeriesSource, config: GateConfig) -> Self {
        Self {
            source,
            config,
            state: GateState::Idle,
            force_refresh: false,
            progress: None,
        }
    }

    /// Bypass cache reads for every ticker in the batch.
    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn DownloadProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Acquire every ticker in order, pacing per the batch's [`PacingPlan`].
    ///
    /// Stops at the first failing ticker and returns its error.
    pub fn get_batch(
        &mut self,
        tickers: &[String],
        lookback_days: u32,
        resolution: Resolution,
    ) -> Result<BatchResult, DataError> {
        let plan = PacingPlan::for_batch(
            self.config.quota_per_window,
            resolution,
            lookback_days,
            tickers.len(),
        )?;
        info!(
            tickers = tickers.len(),
            %resolution,
            lookback_days,
            estimated_bars = plan.total_estimated_bars,
            strategy = ?plan.strategy,
            "starting batch acquisition"
        );

        let mut result = BatchResult {
            series: BTreeMap::new(),
            plan,
            fetched: 0,
            cached: 0,
            cooldowns: 0,
        };
        self.state = match plan.strategy {
            PacingStrategy::Windowed => GateState::Accumulating { counter: 0.0 },
            _ => GateState::Idle,
        };

        let total = tickers.len();
        for (i, ticker) in tickers.iter().enumerate() {
            if let GateState::Accumulating { counter } = self.state {
                if counter > plan.window_threshold() {
                    self.cool_down(&plan, &mut result);
                }
            }

            if let Some(p) = self.progress {
                p.on_start(ticker, i, total);
            }
            let outcome =
                self.source
                    .fetch(ticker, resolution, lookback_days, self.force_refresh);
            if let Some(p) = self.progress {
                p.on_complete(ticker, i, total, outcome.as_ref().map(|(_, hit)| *hit));
            }
            let (bars, hit) = outcome?;
            debug!(ticker = %ticker, hit, bars = bars.len(), "batch item done");

            if hit {
                result.cached += 1;
            } else {
                result.fetched += 1;
                match plan.strategy {
                    PacingStrategy::Unthrottled => {}
                    PacingStrategy::PerTicker => self.cool_down(&plan, &mut result),
                    PacingStrategy::Windowed => {
                        if let GateState::Accumulating { counter } = self.state {
                            self.state = GateState::Accumulating {
                                counter: counter + plan.per_ticker,
                            };
                        }
                    }
                }
            }

            result.series.insert(ticker.clone(), (bars, hit));
        }

        info!(
            fetched = result.fetched,
            cached = result.cached,
            cooldowns = result.cooldowns,
            "batch acquisition complete"
        );
        self.state = GateState::Idle;
        Ok(result)
    }

    /// Block for one full window, then reopen the quota.
    fn cool_down(&mut self, plan: &PacingPlan, result: &mut BatchResult) {
        let clock = self.source.clock();
        let window = self.config.window();
        let until = clock.now() + chrono::Duration::from_std(window).unwrap_or_default();
        self.state = GateState::CoolingDown { until };

        if let Some(p) = self.progress {
            p.on_cooldown(window.as_secs());
        }
        info!(secs = window.as_secs(), "quota window full, cooling down");

        let remaining = (until - clock.now()).to_std().unwrap_or(Duration::ZERO);
        clock.sleep(remaining);
        result.cooldowns += 1;

        self.state = match plan.strategy {
            PacingStrategy::Windowed => GateState::Accumulating { counter: 0.0 },
            _ => GateState::Idle,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Serves empty series; tickers in `cached` are hits, everything else a miss.
    struct ScriptedSource {
        clock: ManualClock,
        cached: HashSet<String>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(cached: &[&str]) -> Self {
            Self {
                clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
                cached: cached.iter().map(|s| s.to_string()).collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl SeriesSource for ScriptedSource {
        fn fetch(
            &self,
            ticker: &str,
            _resolution: Resolution,
            _lookback_days: u32,
            force_refresh: bool,
        ) -> Result<(Series, bool), DataError> {
            self.calls.borrow_mut().push(ticker.to_string());
            Ok((Vec::new(), !force_refresh && self.cached.contains(ticker)))
        }

        fn clock(&self) -> &dyn Clock {
            &self.clock
        }
    }

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{i}")).collect()
    }

    fn gate_config(quota: u64) -> GateConfig {
        GateConfig {
            quota_per_window: quota,
            window_secs: 60,
        }
    }

    #[test]
    fn plan_windowed_at_half_quota_boundary() {
        // 50 days * 3 tickers daily = 150 >= 100, per ticker 50 is not > 50.
        let plan = PacingPlan::for_batch(100, Resolution::Daily, 50, 3).unwrap();
        assert_eq!(plan.total_estimated_bars, 150);
        assert_eq!(plan.per_ticker, 50.0);
        assert_eq!(plan.strategy, PacingStrategy::Windowed);
    }

    #[test]
    fn plan_unthrottled_only_strictly_below_quota() {
        let below = PacingPlan::for_batch(100, Resolution::Daily, 33, 3).unwrap();
        assert_eq!(below.total_estimated_bars, 99);
        assert_eq!(below.strategy, PacingStrategy::Unthrottled);

        let exact = PacingPlan::for_batch(100, Resolution::Daily, 25, 4).unwrap();
        assert_eq!(exact.total_estimated_bars, 100);
        assert_eq!(exact.strategy, PacingStrategy::Windowed);
    }

    #[test]
    fn plan_per_ticker_above_half_quota() {
        let plan = PacingPlan::for_batch(100, Resolution::Daily, 51, 2).unwrap();
        assert_eq!(plan.strategy, PacingStrategy::PerTicker);

        // per ticker exactly at the quota is still allowed
        let at_quota = PacingPlan::for_batch(100, Resolution::Daily, 100, 2).unwrap();
        assert_eq!(at_quota.strategy, PacingStrategy::PerTicker);
    }

    #[test]
    fn plan_rejects_single_ticker_over_quota() {
        let err = PacingPlan::for_batch(100, Resolution::Daily, 101, 2).unwrap_err();
        assert!(matches!(err, DataError::QuotaExceeded { quota: 100, lookback_days: 101, .. }));

        // one day of minute candles is 720 bar-equivalents
        assert!(PacingPlan::for_batch(700, Resolution::OneMinute, 1, 1).is_err());
        assert!(PacingPlan::for_batch(720, Resolution::OneMinute, 1, 1).is_ok());
    }

    #[test]
    fn plan_scales_by_resolution() {
        // a year of hourly candles is 4380 bar-equivalents per ticker
        let small = PacingPlan::for_batch(15_000, Resolution::Hourly, 365, 3).unwrap();
        assert_eq!(small.total_estimated_bars, 365 * 3 * 12);
        assert_eq!(small.strategy, PacingStrategy::Unthrottled);

        let large = PacingPlan::for_batch(15_000, Resolution::Hourly, 365, 4).unwrap();
        assert_eq!(large.total_estimated_bars, 365 * 4 * 12);
        assert_eq!(large.strategy, PacingStrategy::Windowed);

        let daily = PacingPlan::for_batch(15_000, Resolution::Daily, 365, 4).unwrap();
        assert_eq!(daily.strategy, PacingStrategy::Unthrottled);
    }

    #[test]
    fn empty_batch_is_empty() {
        let source = ScriptedSource::new(&[]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        let result = gate.get_batch(&[], 365, Resolution::Daily).unwrap();
        assert!(result.series.is_empty());
        assert!(source.clock.sleeps().is_empty());
    }

    #[test]
    fn unthrottled_never_sleeps() {
        let source = ScriptedSource::new(&[]);
        let mut gate = AcquisitionGate::new(&source, gate_config(15_000));
        let result = gate.get_batch(&tickers(10), 365, Resolution::Daily).unwrap();

        assert_eq!(result.plan.strategy, PacingStrategy::Unthrottled);
        assert_eq!(result.fetched, 10);
        assert!(source.clock.sleeps().is_empty());
    }

    #[test]
    fn windowed_scenario_schedule() {
        // Threshold is 100 - 2*50 = 0: every ticker after a miss waits.
        let source = ScriptedSource::new(&[]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        let result = gate.get_batch(&tickers(3), 50, Resolution::Daily).unwrap();

        assert_eq!(result.plan.strategy, PacingStrategy::Windowed);
        assert_eq!(result.cooldowns, 2);
        assert_eq!(source.clock.sleeps(), vec![Duration::from_secs(60); 2]);
        assert_eq!(result.series.len(), 3);
        assert_eq!(gate.state(), GateState::Idle);
    }

    #[test]
    fn windowed_counter_equal_to_threshold_does_not_wait() {
        // per ticker 25, threshold 50: waits only once the counter reaches 75.
        let source = ScriptedSource::new(&[]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        let result = gate.get_batch(&tickers(5), 25, Resolution::Daily).unwrap();

        assert_eq!(result.plan.strategy, PacingStrategy::Windowed);
        assert_eq!(result.cooldowns, 1);
    }

    #[test]
    fn windowed_cache_hits_are_free() {
        let source = ScriptedSource::new(&["T0", "T1", "T2", "T3"]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        let result = gate.get_batch(&tickers(5), 25, Resolution::Daily).unwrap();

        assert_eq!(result.cached, 4);
        assert_eq!(result.fetched, 1);
        assert_eq!(result.cooldowns, 0);
    }

    #[test]
    fn per_ticker_sleeps_after_each_acquisition_only() {
        let source = ScriptedSource::new(&["T1"]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        let result = gate.get_batch(&tickers(3), 60, Resolution::Daily).unwrap();

        assert_eq!(result.plan.strategy, PacingStrategy::PerTicker);
        assert_eq!(result.fetched, 2);
        assert_eq!(result.cooldowns, 2);
        assert_eq!(source.clock.total_slept(), Duration::from_secs(120));
    }

    #[test]
    fn force_refresh_turns_hits_into_acquisitions() {
        let source = ScriptedSource::new(&["T0", "T1", "T2"]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100)).with_force_refresh(true);
        let result = gate.get_batch(&tickers(3), 60, Resolution::Daily).unwrap();

        assert_eq!(result.fetched, 3);
        assert_eq!(result.cooldowns, 3);
    }

    #[test]
    fn schedule_is_reproducible() {
        let run = || {
            let source = ScriptedSource::new(&["T2", "T5"]);
            let mut gate = AcquisitionGate::new(&source, gate_config(100));
            gate.get_batch(&tickers(8), 20, Resolution::Daily).unwrap();
            let calls = source.calls.borrow().clone();
            (source.clock.sleeps(), calls)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn quota_error_happens_before_any_fetch() {
        let source = ScriptedSource::new(&[]);
        let mut gate = AcquisitionGate::new(&source, gate_config(100));
        assert!(gate.get_batch(&tickers(2), 500, Resolution::Daily).is_err());
        assert!(source.calls.borrow().is_empty());
    }
}
