//! Domain types for fxlens

pub mod pair;
pub mod point;
pub mod range;

pub use pair::{CurrencyPair, PairError};
pub use point::{DatedRecord, DerivedPoint, PricePoint, RatePoint, SeriesKind};
pub use range::DateRange;
