//! Result aggregator: deduplicated, ranked candidate portfolios and the
//! share allocation of the best one.
//!
//! Deduplication key: the Sharpe ratio rounded to 5 places. The first
//! candidate with a given key is kept; later ones are skipped regardless of
//! their tickers.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::optimizer::round_to;

/// One evaluated subset with its optimal weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub tickers: Vec<String>,
    /// Full precision, same order as `tickers`.
    pub weights: Vec<f64>,
    pub sharpe: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
}

impl Candidate {
    /// Weights rounded to 3 places for display.
    pub fn display_weights(&self) -> Vec<f64> {
        self.weights.iter().map(|w| round_to(*w, 3)).collect()
    }

    pub fn dedup_key(&self) -> i64 {
        (self.sharpe * 1e5).round() as i64
    }
}

/// Outcome of an insert operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// Same rounded Sharpe as an earlier candidate.
    Duplicate,
    /// Non-finite Sharpe.
    Skipped,
}

/// Append-only candidate set with a Sharpe dedup index.
#[derive(Debug, Default)]
pub struct ResultSet {
    entries: Vec<Candidate>,
    seen: HashSet<i64>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, candidate: Candidate) -> InsertResult {
        if !candidate.sharpe.is_finite() {
            return InsertResult::Skipped;
        }
        if !self.seen.insert(candidate.dedup_key()) {
            return InsertResult::Duplicate;
        }
        self.entries.push(candidate);
        InsertResult::Inserted
    }

    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates best-first; ties keep insertion order.
    pub fn into_ranked(self) -> Vec<Candidate> {
        let mut ranked = self.entries;
        ranked.sort_by(|a, b| {
            b.sharpe
                .partial_cmp(&a.sharpe)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Rank the set and allocate `capital` across the best candidate.
    pub fn finalize(
        self,
        capital: f64,
        latest_prices: &HashMap<String, f64>,
    ) -> Result<FinalResults, SearchError> {
        let ranked = self.into_ranked();
        let best = ranked.first().ok_or(SearchError::NoCandidates)?;
        let allocation = Allocation::for_candidate(best, capital, latest_prices)?;
        Ok(FinalResults { ranked, allocation })
    }
}

/// Whole-share holding of one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub weight: f64,
    pub price: f64,
    pub shares: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub capital: f64,
    pub positions: Vec<Position>,
    pub total_cost: f64,
    /// Capital minus total cost; negative when rounding up overshoots.
    pub leftover: f64,
}

impl Allocation {
    /// `shares = round(capital / price × weight)` per ticker.
    pub fn for_candidate(
        candidate: &Candidate,
        capital: f64,
        latest_prices: &HashMap<String, f64>,
    ) -> Result<Self, SearchError> {
        let mut positions = Vec::with_capacity(candidate.tickers.len());
        for (ticker, &weight) in candidate.tickers.iter().zip(&candidate.weights) {
            let price = latest_prices
                .get(ticker)
                .copied()
                .filter(|p| p.is_finite() && *p > 0.0)
                .ok_or_else(|| SearchError::MissingPrice {
                    ticker: ticker.clone(),
                })?;
            let shares = (capital / price * weight).round() as i64;
            positions.push(Position {
                ticker: ticker.clone(),
                weight,
                price,
                shares,
                cost: shares as f64 * price,
            });
        }
        let total_cost = positions.iter().map(|p| p.cost).sum::<f64>();
        Ok(Self {
            capital,
            positions,
            total_cost,
            leftover: capital - total_cost,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResults {
    pub ranked: Vec<Candidate>,
    pub allocation: Allocation,
}
