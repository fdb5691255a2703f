//! Property tests for data-layer invariants.
//!
//! Uses proptest to verify:
//! 1. Pacing classification: per-ticker load above the quota is always rejected
//! 2. Gate schedule: waits never exceed the number of acquisitions
//! 3. Price matrix: rows are sorted, unique and cover every input date

use std::cell::Cell;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use sharpelab_core::clock::{Clock, ManualClock};
use sharpelab_core::data::{
    AcquisitionGate, DataError, GateConfig, PacingPlan, PacingStrategy, PriceMatrix, SeriesSource,
};
use sharpelab_core::domain::{Bar, Resolution, Series};

fn arb_resolution() -> impl Strategy<Value = Resolution> {
    prop::sample::select(Resolution::ALL.to_vec())
}

struct PatternSource {
    clock: ManualClock,
    hits: Vec<bool>,
    next: Cell<usize>,
}

impl SeriesSource for PatternSource {
    fn fetch(
        &self,
        _ticker: &str,
        _resolution: Resolution,
        _lookback_days: u32,
        _force_refresh: bool,
    ) -> Result<(Series, bool), DataError> {
        let i = self.next.get();
        self.next.set(i + 1);
        Ok((Vec::new(), self.hits[i]))
    }

    fn clock(&self) -> &dyn Clock {
        &self.clock
    }
}

// ── 1. Pacing classification ─────────────────────────────────────────

proptest! {
    #[test]
    fn plan_respects_quota(
        quota in 1u64..20_000,
        resolution in arb_resolution(),
        days in 1u32..400,
        count in 1usize..50,
    ) {
        match PacingPlan::for_batch(quota, resolution, days, count) {
            Err(DataError::QuotaExceeded { per_ticker, .. }) => {
                prop_assert!(per_ticker > quota as f64);
            }
            Err(other) => prop_assert!(false, "unexpected error {other}"),
            Ok(plan) => {
                prop_assert!(plan.per_ticker <= quota as f64);
                match plan.strategy {
                    PacingStrategy::Unthrottled => {
                        prop_assert!(plan.total_estimated_bars < quota)
                    }
                    PacingStrategy::PerTicker => {
                        prop_assert!(plan.per_ticker > quota as f64 / 2.0)
                    }
                    PacingStrategy::Windowed => {
                        prop_assert!(plan.total_estimated_bars >= quota);
                        prop_assert!(plan.window_threshold() >= 0.0);
                    }
                }
            }
        }
    }
}

// ── 2. Gate schedule ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn waits_bounded_by_acquisitions(
        hits in prop::collection::vec(any::<bool>(), 1..30),
        days in 1u32..100,
    ) {
        let source = PatternSource {
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            hits: hits.clone(),
            next: Cell::new(0),
        };
        let tickers: Vec<String> = (0..hits.len()).map(|i| format!("T{i}")).collect();
        let config = GateConfig { quota_per_window: 100, window_secs: 60 };

        let result = AcquisitionGate::new(&source, config)
            .get_batch(&tickers, days, Resolution::Daily)
            .unwrap();

        let misses = hits.iter().filter(|h| !**h).count();
        prop_assert_eq!(result.fetched, misses);
        prop_assert!(result.cooldowns <= misses);
        prop_assert_eq!(source.clock.sleeps().len(), result.cooldowns);
        if misses == 0 {
            prop_assert_eq!(result.cooldowns, 0);
        }
    }
}

// ── 3. Price matrix ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn matrix_rows_are_union_of_dates(
        a_days in prop::collection::btree_set(0i64..60, 0..30),
        b_days in prop::collection::btree_set(0i64..60, 0..30),
    ) {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let series = |days: &std::collections::BTreeSet<i64>| -> Series {
            days.iter()
                .map(|d| Bar {
                    time: t0 + Duration::days(*d),
                    open: 10.0 + *d as f64,
                    high: 11.0 + *d as f64,
                    low: 9.0 + *d as f64,
                    close: 10.0 + *d as f64,
                    volume: 1,
                })
                .collect()
        };
        let a = series(&a_days);
        let b = series(&b_days);
        let m = PriceMatrix::from_series([("A", a.as_slice()), ("B", b.as_slice())]);

        let union: std::collections::BTreeSet<i64> = a_days.union(&b_days).copied().collect();
        prop_assert_eq!(m.n_rows(), union.len());
        for pair in m.dates.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        let present = m.column("A").unwrap().iter().filter(|p| p.is_finite()).count();
        prop_assert_eq!(present, a_days.len());
    }
}
