//! Report export: JSON for machines, CSV for spreadsheets.
//!
//! JSON reports carry a `schema_version`; unknown versions are rejected on load.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::aggregator::{Allocation, Candidate};
use crate::portfolio::{PortfolioReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(report: &PortfolioReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize PortfolioReport to JSON")
}

pub fn import_json(json: &str) -> Result<PortfolioReport> {
    let report: PortfolioReport =
        serde_json::from_str(json).context("failed to deserialize PortfolioReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

/// Write the report as pretty JSON to `path`.
pub fn write_report(report: &PortfolioReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, export_json(report)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Load a report previously saved with [`write_report`].
pub fn read_report(path: &Path) -> Result<PortfolioReport> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json).with_context(|| format!("invalid report {}", path.display()))
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Ranked candidates, one row each.
///
/// Columns: rank, tickers, weights, sharpe, annualized_return, annualized_volatility.
/// Tickers and weights are `;`-joined in the same order; weights are rounded to 3 places.
pub fn export_ranked_csv(ranked: &[Candidate]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "rank",
        "tickers",
        "weights",
        "sharpe",
        "annualized_return",
        "annualized_volatility",
    ])?;

    for (i, c) in ranked.iter().enumerate() {
        let weights: Vec<String> = c.display_weights().iter().map(|w| format!("{w:.3}")).collect();
        wtr.write_record([
            &(i + 1).to_string(),
            &c.tickers.join(";"),
            &weights.join(";"),
            &format!("{:.5}", c.sharpe),
            &format!("{:.6}", c.annualized_return),
            &format!("{:.6}", c.annualized_volatility),
        ])?;
    }

    finish(wtr)
}

/// Share allocation of the best candidate.
///
/// Columns: ticker, weight, price, shares, cost.
pub fn export_allocation_csv(allocation: &Allocation) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["ticker", "weight", "price", "shares", "cost"])?;
    for p in &allocation.positions {
        wtr.write_record([
            &p.ticker,
            &format!("{:.3}", p.weight),
            &format!("{:.4}", p.price),
            &p.shares.to_string(),
            &format!("{:.2}", p.cost),
        ])?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Write the ranked list to `path`.
pub fn write_ranked_csv(ranked: &[Candidate], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, export_ranked_csv(ranked)?)
        .with_context(|| format!("failed to write {}", path.display()))
}
