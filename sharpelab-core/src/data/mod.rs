//! Data acquisition: instrument metadata, historical series cache, pacing, alignment.

pub mod align;
pub mod cache;
pub mod gate;
pub mod metadata;
pub mod provider;
pub mod tinkoff;

pub use align::PriceMatrix;
pub use cache::{
    status_of, CacheMeta, CacheStatus, ExpiryPolicy, HistoricalCache, ParquetStore, SeriesKey,
};
pub use gate::{
    AcquisitionGate, BatchResult, GateConfig, GateState, PacingPlan, PacingStrategy, SeriesSource,
};
pub use metadata::{InstrumentMetadata, MetadataSnapshot, MetadataStore};
pub use provider::{DataError, DownloadProgress, MarketDataProvider, StderrProgress};
pub use tinkoff::TinkoffProvider;
