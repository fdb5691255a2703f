//! Search-layer errors.

use sharpelab_core::data::DataError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Raised per combination; the driver logs it and moves on.
    #[error("degenerate subset [{}]: {reason}", tickers.join(", "))]
    DegenerateSubset { tickers: Vec<String>, reason: String },

    #[error(
        "cannot shard {universe_size} tickers into at most {max_shards} shards with \
         C(shard, {share_limit}) < {work_budget}; narrow the selection or raise the work budget"
    )]
    ShardingInfeasible {
        universe_size: usize,
        share_limit: usize,
        work_budget: u64,
        max_shards: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no candidate portfolio could be evaluated")]
    NoCandidates,

    #[error("no price available for '{ticker}'")]
    MissingPrice { ticker: String },

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
