//! Search driver: runs the optimizer over every planned combination.
//!
//! Each pass asks the enumerator for a shard plan (re-shuffled per pass from
//! the seed hierarchy), enumerates the k-subsets of every shard, and solves
//! the ones not seen on an earlier pass. Solves within a shard run on rayon
//! when enabled; results are inserted in combination order so the dedup
//! outcome does not depend on thread count.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sharpelab_core::data::{DataError, PriceMatrix};
use tracing::{debug, info, warn};

use crate::aggregator::{Candidate, InsertResult, ResultSet};
use crate::config::SearchConfig;
use crate::enumerator::{Combinations, Enumerator};
use crate::error::SearchError;
use crate::optimizer::{ObjectiveParams, SharpeOptimizer};
use crate::rng::SeedHierarchy;

/// Everything the driver needs besides the prices.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub share_limit: usize,
    pub objective: ObjectiveParams,
    pub work_budget: u64,
    pub max_shards: usize,
    pub parallel: bool,
    pub passes: Option<usize>,
    pub seed: Option<u64>,
}

impl SearchParams {
    pub fn from_config(config: &SearchConfig, share_limit: usize, max_portion: f64) -> Self {
        Self {
            share_limit,
            objective: ObjectiveParams {
                risk_free_rate: config.risk_free_rate,
                trading_days: config.trading_days,
                max_portion,
            },
            work_budget: config.work_budget,
            max_shards: config.max_shards,
            parallel: config.parallel,
            passes: config.passes,
            seed: config.seed,
        }
    }
}

/// Counters describing one search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Master seed actually used; pass it back to reproduce the run.
    pub seed: u64,
    pub passes: usize,
    pub shards_per_pass: Vec<usize>,
    /// Combinations handed to the optimizer.
    pub evaluated: usize,
    /// Combinations skipped because an earlier pass already solved them.
    pub repeated: usize,
    pub degenerate: usize,
    /// Solved but dropped by the rounded-Sharpe dedup.
    pub duplicates: usize,
    pub candidates: usize,
}

/// The k-subsets of `shard` in lexicographic index order, minus those already
/// in `solved` (keyed by sorted tickers). Also returns how many were skipped.
fn pending_subsets(
    shard: &[String],
    k: usize,
    solved: &mut HashSet<Vec<String>>,
) -> (Vec<Vec<String>>, usize) {
    let mut batch = Vec::new();
    let mut repeated = 0;
    for combo in Combinations::new(shard.len(), k) {
        let tickers: Vec<String> = combo.iter().map(|&i| shard[i].clone()).collect();
        let mut key = tickers.clone();
        key.sort();
        if solved.insert(key) {
            batch.push(tickers);
        } else {
            repeated += 1;
        }
    }
    (batch, repeated)
}

/// Search every planned subset of `matrix.tickers`.
pub fn run_search(
    matrix: &PriceMatrix,
    params: &SearchParams,
) -> Result<(ResultSet, SearchStats), SearchError> {
    let k = params.share_limit;
    let universe = matrix.tickers.clone();
    if k < 2 {
        return Err(SearchError::InvalidConfig(format!(
            "share limit must be at least 2, got {k}"
        )));
    }
    if k > universe.len() {
        return Err(DataError::InvalidSelection(format!(
            "share limit {k} exceeds the {} selected tickers",
            universe.len()
        ))
        .into());
    }

    let optimizer = SharpeOptimizer::new(params.objective);
    optimizer.check_feasible(k)?;
    let enumerator = Enumerator::new(params.work_budget, params.max_shards);
    let seeds = params
        .seed
        .map(SeedHierarchy::new)
        .unwrap_or_else(SeedHierarchy::from_entropy);

    let column_of: HashMap<&str, usize> = matrix
        .tickers
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let first_plan = enumerator.plan(&universe, k, &mut seeds.rng_for(&universe, 0))?;
    let passes = params.passes.unwrap_or(first_plan.len()).max(1);
    info!(
        universe = universe.len(),
        share_limit = k,
        shards = first_plan.len(),
        passes,
        seed = seeds.master_seed(),
        "starting combination search"
    );

    let evaluate = |tickers: &Vec<String>| -> Result<Candidate, SearchError> {
        let columns: Vec<&[f64]> = tickers
            .iter()
            .map(|t| matrix.column_at(column_of[t.as_str()]))
            .collect();
        let solution = optimizer.optimize(tickers, &columns)?;
        debug!(
            tickers = ?tickers,
            sharpe = solution.sharpe,
            iterations = solution.iterations,
            "solved subset"
        );
        Ok(Candidate {
            tickers: tickers.clone(),
            weights: solution.weights,
            sharpe: solution.sharpe,
            annualized_return: solution.annualized_return,
            annualized_volatility: solution.annualized_volatility,
        })
    };

    let mut stats = SearchStats {
        seed: seeds.master_seed(),
        passes,
        ..SearchStats::default()
    };
    let mut results = ResultSet::new();
    let mut solved: HashSet<Vec<String>> = HashSet::new();
    let mut plan = first_plan;

    for pass in 0..passes {
        if pass > 0 {
            plan = enumerator.plan(&universe, k, &mut seeds.rng_for(&universe, pass as u64))?;
        }
        stats.shards_per_pass.push(plan.len());

        for shard in &plan {
            let (batch, repeated) = pending_subsets(shard, k, &mut solved);
            stats.repeated += repeated;

            let outcomes: Vec<Result<Candidate, SearchError>> = if params.parallel {
                batch.par_iter().map(&evaluate).collect()
            } else {
                batch.iter().map(&evaluate).collect()
            };

            for outcome in outcomes {
                stats.evaluated += 1;
                match outcome {
                    Ok(candidate) => match results.insert(candidate) {
                        InsertResult::Inserted => {}
                        InsertResult::Duplicate => stats.duplicates += 1,
                        InsertResult::Skipped => stats.degenerate += 1,
                    },
                    Err(SearchError::DegenerateSubset { tickers, reason }) => {
                        warn!(tickers = ?tickers, %reason, "skipping degenerate subset");
                        stats.degenerate += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        info!(
            pass = pass + 1,
            of = passes,
            candidates = results.len(),
            "search pass complete"
        );
    }

    stats.candidates = results.len();
    Ok((results, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sharpelab_core::domain::Bar;

    fn series(drift: f64, freq: f64, n: usize) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let mut p = 100.0;
        (0..n)
            .map(|t| {
                if t > 0 {
                    p *= (drift + 0.02 * (t as f64 * freq).sin()).exp();
                }
                Bar {
                    time: t0 + Duration::days(t as i64),
                    open: p,
                    high: p * 1.01,
                    low: p * 0.99,
                    close: p,
                    volume: 10,
                }
            })
            .collect()
    }

    fn matrix(n: usize) -> PriceMatrix {
        let data: Vec<(String, Vec<Bar>)> = (0..n)
            .map(|i| {
                (
                    format!("T{i:02}"),
                    series(0.0005 + i as f64 * 1e-4, 0.7 + i as f64 * 0.37, 200),
                )
            })
            .collect();
        PriceMatrix::from_series(data.iter().map(|(t, b)| (t.as_str(), b.as_slice())))
    }

    fn params(k: usize, budget: u64) -> SearchParams {
        SearchParams {
            share_limit: k,
            objective: ObjectiveParams {
                risk_free_rate: 0.05,
                trading_days: 252.0,
                max_portion: 0.7,
            },
            work_budget: budget,
            max_shards: 9,
            parallel: false,
            passes: None,
            seed: Some(11),
        }
    }

    #[test]
    fn three_tickers_pairs_evaluated_once_each() {
        let (results, stats) = run_search(&matrix(3), &params(2, 2000)).unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.shards_per_pass, vec![1]);
        assert_eq!(stats.evaluated, 3);
        assert_eq!(stats.degenerate, 0);
        assert_eq!(stats.duplicates, 0);

        let mut combos: Vec<Vec<String>> =
            results.entries().iter().map(|c| c.tickers.clone()).collect();
        combos.sort();
        let expected: Vec<Vec<String>> = [["T00", "T01"], ["T00", "T02"], ["T01", "T02"]]
            .iter()
            .map(|pair| pair.iter().map(|t| t.to_string()).collect())
            .collect();
        assert_eq!(combos, expected);
    }

    #[test]
    fn pending_subsets_are_lexicographic_and_skip_solved() {
        let shard: Vec<String> = ["A", "B", "C"].iter().map(|t| t.to_string()).collect();
        let mut solved = HashSet::new();

        let (batch, repeated) = pending_subsets(&shard, 2, &mut solved);
        assert_eq!(repeated, 0);
        assert_eq!(
            batch,
            vec![
                vec!["A".to_string(), "B".to_string()],
                vec!["A".to_string(), "C".to_string()],
                vec!["B".to_string(), "C".to_string()],
            ]
        );

        // the same subsets in another shard order are all repeats
        let reordered: Vec<String> = ["C", "A", "B"].iter().map(|t| t.to_string()).collect();
        let (again, repeated) = pending_subsets(&reordered, 2, &mut solved);
        assert!(again.is_empty());
        assert_eq!(repeated, 3);
    }

    #[test]
    fn sharded_search_never_repeats_a_subset() {
        let mut p = params(2, 20);
        p.passes = Some(3);
        let (_, stats) = run_search(&matrix(10), &p).unwrap();
        assert_eq!(stats.passes, 3);
        assert!(stats.shards_per_pass.iter().all(|s| *s >= 2));
        // at most C(10, 2) distinct pairs can ever be solved
        assert!(stats.evaluated <= 45);
    }

    #[test]
    fn parallel_matches_sequential() {
        let m = matrix(6);
        let mut p = params(3, 2000);
        let (seq, _) = run_search(&m, &p).unwrap();
        p.parallel = true;
        let (par, _) = run_search(&m, &p).unwrap();
        assert_eq!(seq.entries(), par.entries());
    }

    #[test]
    fn share_limit_validation() {
        assert!(matches!(
            run_search(&matrix(3), &params(1, 2000)).unwrap_err(),
            SearchError::InvalidConfig(_)
        ));
        assert!(matches!(
            run_search(&matrix(3), &params(4, 2000)).unwrap_err(),
            SearchError::Data(DataError::InvalidSelection(_))
        ));
    }
}
