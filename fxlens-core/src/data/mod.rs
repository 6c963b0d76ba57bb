//! Data layer: providers, circuit breaker and series stores.

pub mod circuit_breaker;
pub mod exchange_rate;
pub mod parquet_store;
pub mod provider;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use exchange_rate::ExchangeRateApiProvider;
pub use parquet_store::{ParquetRecord, ParquetStore, SeriesMeta};
pub use provider::{
    DailyRateProvider, FetchError, PerDayRates, PriceProvider, PriceSeries, RangeSource,
    RateProvider, RateSeries,
};
pub use store::{DatedRecordStore, MemoryStore, StoreError, UpsertSummary};
pub use yahoo::YahooProvider;
