//! Sharpe optimizer: long-only, capped weights maximizing annualized Sharpe.
//!
//! Projected gradient ascent over the capped simplex
//! `{w : Σw = 1, 0 ≤ wᵢ ≤ max_portion}` with an analytic gradient and Armijo
//! backtracking, started from uniform weights.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Relative eigenvalue floor below which the covariance counts as singular.
const SINGULAR_RATIO: f64 = 1e-10;
const ARMIJO_C: f64 = 1e-4;

/// Objective parameters shared by every subset of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveParams {
    pub risk_free_rate: f64,
    pub trading_days: f64,
    pub max_portion: f64,
}

/// Optimal weights for one subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub weights: Vec<f64>,
    /// Rounded to 5 places.
    pub sharpe: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub iterations: usize,
}

/// `ln(p[t] / p[t-1])`, zero for the first row and wherever either price is
/// missing or non-positive.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(prices.len());
    if prices.is_empty() {
        return out;
    }
    out.push(0.0);
    for pair in prices.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        let ok = prev.is_finite() && cur.is_finite() && prev > 0.0 && cur > 0.0;
        out.push(if ok { (cur / prev).ln() } else { 0.0 });
    }
    out
}

/// Euclidean projection onto `{Σw = 1, 0 ≤ wᵢ ≤ cap}` by bisection on the shift.
///
/// Requires `v.len() * cap >= 1`.
pub fn project_capped_simplex(v: &[f64], cap: f64) -> Vec<f64> {
    let min = v.iter().copied().fold(f64::INFINITY, f64::min);
    let max = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (mut lo, mut hi) = (min - cap, max);
    let mass = |tau: f64| -> f64 { v.iter().map(|x| (x - tau).clamp(0.0, cap)).sum() };

    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if mass(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let tau = 0.5 * (lo + hi);
    v.iter().map(|x| (x - tau).clamp(0.0, cap)).collect()
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Annualized mean vector and covariance matrix of a return panel.
struct Moments {
    mean: DVector<f64>,
    cov: DMatrix<f64>,
}

impl Moments {
    fn from_returns(returns: &DMatrix<f64>, trading_days: f64) -> Self {
        let rows = returns.nrows();
        let mean = returns.row_mean().transpose();
        let mut centered = returns.clone();
        for (j, mut col) in centered.column_iter_mut().enumerate() {
            col.add_scalar_mut(-mean[j]);
        }
        let cov = centered.transpose() * &centered / (rows as f64 - 1.0);
        Self {
            mean: mean * trading_days,
            cov: cov * trading_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SharpeOptimizer {
    params: ObjectiveParams,
    max_iterations: usize,
    tolerance: f64,
}

impl SharpeOptimizer {
    pub fn new(params: ObjectiveParams) -> Self {
        Self {
            params,
            max_iterations: 500,
            tolerance: 1e-10,
        }
    }

    pub fn params(&self) -> &ObjectiveParams {
        &self.params
    }

    /// Check that `k` weights capped at `max_portion` can sum to one.
    pub fn check_feasible(&self, k: usize) -> Result<(), SearchError> {
        let cap = self.params.max_portion;
        if !(cap > 0.0 && cap <= 1.0) {
            return Err(SearchError::InvalidConfig(format!(
                "max portion {cap} must be in (0, 1]"
            )));
        }
        if (k as f64) * cap < 1.0 - 1e-12 {
            return Err(SearchError::InvalidConfig(format!(
                "{k} weights capped at {cap} cannot sum to 1"
            )));
        }
        Ok(())
    }

    /// Solve for one subset. `columns[i]` holds the price history of `tickers[i]`.
    pub fn optimize(&self, tickers: &[String], columns: &[&[f64]]) -> Result<Solution, SearchError> {
        let k = columns.len();
        self.check_feasible(k)?;
        let degenerate = |reason: &str| SearchError::DegenerateSubset {
            tickers: tickers.to_vec(),
            reason: reason.to_string(),
        };

        let rows = columns.first().map_or(0, |c| c.len());
        if rows < 2 {
            return Err(degenerate("fewer than two price rows"));
        }
        let mut returns = DMatrix::<f64>::zeros(rows, k);
        for (j, col) in columns.iter().enumerate() {
            if col.len() != rows {
                return Err(degenerate("price columns differ in length"));
            }
            returns.set_column(j, &DVector::from_vec(log_returns(col)));
        }
        let moments = Moments::from_returns(&returns, self.params.trading_days);

        let eigen = moments.cov.symmetric_eigenvalues();
        let max_eig = eigen.max();
        let min_eig = eigen.min();
        if !(max_eig.is_finite() && min_eig.is_finite()) || max_eig <= 0.0 {
            return Err(degenerate("covariance is zero or non-finite"));
        }
        if min_eig <= max_eig * SINGULAR_RATIO {
            return Err(degenerate("covariance matrix is singular"));
        }

        let rf = self.params.risk_free_rate;
        let sharpe = |w: &DVector<f64>| -> Option<(f64, f64, f64)> {
            let ret = moments.mean.dot(w);
            let var = w.dot(&(&moments.cov * w));
            if !(var.is_finite() && var > 0.0) {
                return None;
            }
            let vol = var.sqrt();
            Some(((ret - rf) / vol, ret, vol))
        };

        let mut w = DVector::from_element(k, 1.0 / k as f64);
        let (mut s, _, _) = sharpe(&w).ok_or_else(|| degenerate("zero volatility"))?;
        let mut step = 1.0;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            let cw = &moments.cov * &w;
            let ret = moments.mean.dot(&w);
            let vol = w.dot(&cw).sqrt();
            // ∇S = a/σ − (a·w − rf)·Cw/σ³
            let grad = &moments.mean / vol - cw * ((ret - rf) / vol.powi(3));
            if grad.iter().any(|g| !g.is_finite()) {
                return Err(degenerate("non-finite gradient"));
            }

            let mut accepted = None;
            while step > 1e-14 {
                let trial = w.clone() + &grad * step;
                let candidate = DVector::from_vec(project_capped_simplex(
                    trial.as_slice(),
                    self.params.max_portion,
                ));
                let dir = &candidate - &w;
                if dir.norm() < self.tolerance {
                    break;
                }
                match sharpe(&candidate) {
                    Some((s_new, _, _)) if s_new >= s + ARMIJO_C * grad.dot(&dir) => {
                        accepted = Some((candidate, s_new, dir.norm()));
                        break;
                    }
                    Some(_) => step *= 0.5,
                    None => return Err(degenerate("zero volatility at iterate")),
                }
            }

            match accepted {
                Some((next, s_next, moved)) => {
                    if next.iter().any(|x| !x.is_finite()) {
                        return Err(degenerate("non-finite weights"));
                    }
                    let gain = s_next - s;
                    w = next;
                    s = s_next;
                    step = (step * 2.0).min(1e6);
                    if moved < self.tolerance || gain.abs() < 1e-14 {
                        break;
                    }
                }
                None => break,
            }
        }

        let (s, ret, vol) = sharpe(&w).ok_or_else(|| degenerate("zero volatility"))?;
        if !s.is_finite() {
            return Err(degenerate("non-finite Sharpe ratio"));
        }
        Ok(Solution {
            weights: w.iter().copied().collect(),
            sharpe: round_to(s, 5),
            annualized_return: ret,
            annualized_volatility: vol,
            iterations,
        })
    }
}
