//! fxlens core: incremental sync of a daily price series and an FX rate
//! series, and their date-joined conversion.
//!
//! - Domain types (price/rate/derived points, date ranges, currency pairs)
//! - Dated-record stores (in-memory and parquet) with upsert-by-date
//! - Providers (Yahoo Finance chart API, exchangerate-api history)
//! - Watermark resolution and the incremental syncer
//! - Inner-join derivation of price in the base currency

pub mod config;
pub mod data;
pub mod domain;
pub mod join;
pub mod sync;

pub use config::{AppConfig, ConfigError};
pub use join::{derive, derive_from, Derivation, DivisionError};
pub use sync::{IncrementalSyncer, SyncError, SyncReport, WatermarkPolicy};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: store and provider types can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::PricePoint>();
        require_sync::<domain::PricePoint>();
        require_send::<domain::RatePoint>();
        require_sync::<domain::RatePoint>();
        require_send::<domain::DateRange>();
        require_sync::<domain::DateRange>();

        require_send::<data::MemoryStore<domain::RatePoint>>();
        require_sync::<data::MemoryStore<domain::RatePoint>>();
        require_send::<data::ParquetStore<domain::PricePoint>>();
        require_sync::<data::ParquetStore<domain::PricePoint>>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
        require_send::<data::PerDayRates<data::ExchangeRateApiProvider>>();
        require_sync::<data::PerDayRates<data::ExchangeRateApiProvider>>();

        require_send::<SyncReport>();
        require_sync::<SyncReport>();
        require_send::<Derivation>();
        require_sync::<Derivation>();
    }
}
