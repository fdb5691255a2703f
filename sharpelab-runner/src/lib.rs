//! SharpeLab Runner: portfolio search, optimization and aggregation.
//!
//! This crate builds on `sharpelab-core` to provide:
//! - TOML configuration with defaults for every field
//! - Combination enumerator with work-budget sharding
//! - Capped long-only Sharpe optimizer
//! - Deduplicating result set and share allocation
//! - Multi-pass search driver (optionally parallel)
//! - JSON / CSV report export

pub mod aggregator;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod export;
pub mod optimizer;
pub mod portfolio;
pub mod rng;
pub mod search;

pub use aggregator::{Allocation, Candidate, FinalResults, InsertResult, Position, ResultSet};
pub use config::{ConfigError, DataConfig, HistoryConfig, SearchConfig, SharpeConfig};
pub use enumerator::{binomial, split_even, Combinations, Enumerator};
pub use error::SearchError;
pub use optimizer::{log_returns, ObjectiveParams, SharpeOptimizer, Solution};
pub use portfolio::{
    optimize_from_matrix, optimize_portfolio, AcquisitionSummary, PortfolioReport,
    PortfolioRequest,
};
pub use rng::SeedHierarchy;
pub use search::{run_search, SearchParams, SearchStats};
