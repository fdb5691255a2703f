//! Multi-ticker price alignment.
//!
//! Builds the price matrix the optimizer works on: one row per date in the
//! union of every series' dates, one column per ticker, cell = the open of
//! the first bar that ticker has on that date. Missing cells are NaN (no
//! forward-fill).

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::domain::Bar;

/// Opening prices for several tickers on a common date axis.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatrix {
    /// The common date axis, ascending.
    pub dates: Vec<NaiveDate>,
    /// Column labels, in input order.
    pub tickers: Vec<String>,
    /// `columns[j][i]` is the open of `tickers[j]` on `dates[i]`.
    columns: Vec<Vec<f64>>,
}

impl PriceMatrix {
    /// Align the given series. Column order follows iteration order.
    pub fn from_series<'a, I>(series: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [Bar])>,
    {
        let series: Vec<(&str, &[Bar])> = series.into_iter().collect();

        let mut all_dates = BTreeSet::new();
        for (_, bars) in &series {
            for bar in *bars {
                all_dates.insert(bar.date());
            }
        }
        let dates: Vec<NaiveDate> = all_dates.into_iter().collect();
        let row_of: HashMap<NaiveDate, usize> =
            dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut tickers = Vec::with_capacity(series.len());
        let mut columns = Vec::with_capacity(series.len());
        for (ticker, bars) in series {
            let mut column = vec![f64::NAN; dates.len()];
            let mut seen = vec![false; dates.len()];
            // intraday series: the first bar of each date carries its open
            let mut ordered: Vec<&Bar> = bars.iter().collect();
            ordered.sort_by_key(|b| b.time);
            for bar in ordered {
                let row = row_of[&bar.date()];
                if !seen[row] {
                    seen[row] = true;
                    column[row] = bar.open;
                }
            }
            tickers.push(ticker.to_string());
            columns.push(column);
        }

        Self {
            dates,
            tickers,
            columns,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_tickers(&self) -> usize {
        self.tickers.len()
    }

    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Column by index.
    pub fn column_at(&self, index: usize) -> &[f64] {
        &self.columns[index]
    }

    pub fn column(&self, ticker: &str) -> Option<&[f64]> {
        self.ticker_index(ticker).map(|i| self.column_at(i))
    }

    /// Last finite open per ticker, `None` when a column has no prices at all.
    pub fn latest_prices(&self) -> Vec<Option<f64>> {
        self.columns
            .iter()
            .map(|col| col.iter().rev().copied().find(|p| p.is_finite()))
            .collect()
    }
}
