//! Dated records: the units stored and joined by the engine.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A record keyed by calendar date.
///
/// Stores rely on `date()` being the primary key: two records with the same
/// date describe the same row, and the later one replaces the earlier.
pub trait DatedRecord: Clone + PartialEq + std::fmt::Debug + Send + Sync {
    /// Which series this record type belongs to.
    const KIND: SeriesKind;

    fn date(&self) -> NaiveDate;
}

/// The two series the engine maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Price,
    Rate,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Price => "price",
            SeriesKind::Rate => "rate",
        }
    }
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trading day's OHLCV for a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PricePoint {
    /// All price fields are finite numbers.
    pub fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
    }
}

impl DatedRecord for PricePoint {
    const KIND: SeriesKind = SeriesKind::Price;

    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Base→quote conversion rate observed for a calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub date: NaiveDate,
    pub rate: f64,
}

impl DatedRecord for RatePoint {
    const KIND: SeriesKind = SeriesKind::Rate;

    fn date(&self) -> NaiveDate {
        self.date
    }
}

/// Close price converted into the base currency. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedPoint {
    pub date: NaiveDate,
    pub price_usd: f64,
}
