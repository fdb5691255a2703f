//! SharpeLab Core: instrument metadata, historical series cache, acquisition
//! pacing and price alignment.
//!
//! This crate owns everything between the remote market-data provider and
//! the portfolio search:
//! - Domain types (bars, resolutions, instrument records)
//! - Instrument metadata snapshot with expiry
//! - Parquet-backed historical series cache with per-resolution expiry
//! - Quota-aware acquisition gate for ticker batches
//! - Price matrix alignment across tickers
//! - Tinkoff Invest REST provider

pub mod clock;
pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed to worker threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Resolution>();
        require_sync::<domain::Resolution>();
        require_send::<domain::InstrumentRecord>();
        require_sync::<domain::InstrumentRecord>();

        // Data types
        require_send::<data::InstrumentMetadata>();
        require_sync::<data::InstrumentMetadata>();
        require_send::<data::PriceMatrix>();
        require_sync::<data::PriceMatrix>();
        require_send::<data::ParquetStore>();
        require_sync::<data::ParquetStore>();
        require_send::<data::BatchResult>();
        require_sync::<data::BatchResult>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();

        // Clocks
        require_send::<clock::SystemClock>();
        require_sync::<clock::ManualClock>();
    }

    /// Architecture contract: providers never see the cache or the gate.
    ///
    /// `MarketDataProvider` only receives an instrument id, a window and a
    /// resolution, so it cannot tell whether a call was needed.
    #[test]
    fn provider_trait_is_cache_agnostic() {
        fn _check_trait_object_builds(
            provider: &dyn data::MarketDataProvider,
            from: chrono::DateTime<chrono::Utc>,
            to: chrono::DateTime<chrono::Utc>,
        ) -> Result<domain::Series, data::DataError> {
            provider.fetch_candles("FIGI", from, to, domain::Resolution::Daily)
        }
    }
}
