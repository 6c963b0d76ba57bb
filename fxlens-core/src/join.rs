//! Price-in-base-currency derivation: join prices with rates by date.
//!
//! Only dates present in both series produce a point (inner join); there is
//! no interpolation or forward-fill. A zero or otherwise unusable rate is
//! reported per date and never becomes `inf`/`NaN` in the output.

use crate::data::store::{DatedRecordStore, StoreError};
use crate::domain::{DerivedPoint, PricePoint, RatePoint};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// A matched date whose quotient could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
#[error("cannot divide close {close} by rate {rate} on {date}")]
pub struct DivisionError {
    pub date: NaiveDate,
    pub close: f64,
    pub rate: f64,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV write error at {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one derivation: the points that could be computed plus the
/// dates that could not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivation {
    pub points: Vec<DerivedPoint>,
    pub errors: Vec<DivisionError>,
}

/// Headline numbers for a derived series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivationSummary {
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl Derivation {
    /// `None` for an empty derivation.
    pub fn summary(&self) -> Option<DerivationSummary> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        let (min, max) = self
            .points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.price_usd), hi.max(p.price_usd))
            });
        Some(DerivationSummary {
            first_date: first.date,
            last_date: last.date,
            count: self.points.len(),
            min,
            max,
            last: last.price_usd,
        })
    }
}

/// Join in-memory series. Prices may arrive in any order; output is
/// ascending by date.
pub fn derive_from(prices: &[PricePoint], rates: &[RatePoint]) -> Derivation {
    let lookup: HashMap<NaiveDate, f64> = rates.iter().map(|r| (r.date, r.rate)).collect();

    let mut ordered: Vec<&PricePoint> = prices.iter().collect();
    ordered.sort_by_key(|p| p.date);
    ordered.dedup_by_key(|p| p.date);

    let mut derivation = Derivation::default();
    for price in ordered {
        let Some(&rate) = lookup.get(&price.date) else {
            continue;
        };
        let quotient = price.close / rate;
        if rate == 0.0 || !quotient.is_finite() {
            tracing::warn!(
                date = %price.date,
                close = price.close,
                rate,
                "rate unusable for derivation"
            );
            derivation.errors.push(DivisionError {
                date: price.date,
                close: price.close,
                rate,
            });
            continue;
        }
        derivation.points.push(DerivedPoint {
            date: price.date,
            price_usd: quotient,
        });
    }
    derivation
}

/// Load both stores and join them.
pub fn derive(
    prices: &(impl DatedRecordStore<PricePoint> + ?Sized),
    rates: &(impl DatedRecordStore<RatePoint> + ?Sized),
) -> Result<Derivation, StoreError> {
    let price_rows = prices.load_all()?;
    let rate_rows = rates.load_all()?;
    let derivation = derive_from(&price_rows, &rate_rows);
    tracing::info!(
        prices = price_rows.len(),
        rates = rate_rows.len(),
        derived = derivation.points.len(),
        errors = derivation.errors.len(),
        "derivation complete"
    );
    Ok(derivation)
}

/// Write derived points as `date,price_usd` CSV.
pub fn write_derived_csv(path: &Path, points: &[DerivedPoint]) -> Result<(), ExportError> {
    let display = path.display().to_string();
    let mut writer = csv::Writer::from_path(path).map_err(|source| ExportError::Csv {
        path: display.clone(),
        source,
    })?;
    for point in points {
        writer.serialize(point).map_err(|source| ExportError::Csv {
            path: display.clone(),
            source,
        })?;
    }
    writer.flush().map_err(|source| ExportError::Io {
        path: display,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn price(date: &str, close: f64) -> PricePoint {
        PricePoint {
            date: d(date),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0,
        }
    }

    fn rate(date: &str, rate: f64) -> RatePoint {
        RatePoint { date: d(date), rate }
    }

    #[test]
    fn inner_join_skips_unmatched_dates() {
        let derivation = derive_from(
            &[price("2024-01-01", 10.0), price("2024-01-02", 11.0), price("2024-01-03", 12.0)],
            &[rate("2024-01-01", 2.0), rate("2024-01-03", 4.0)],
        );
        assert!(derivation.errors.is_empty());
        assert_eq!(
            derivation.points,
            vec![
                DerivedPoint { date: d("2024-01-01"), price_usd: 5.0 },
                DerivedPoint { date: d("2024-01-03"), price_usd: 3.0 },
            ]
        );
    }

    #[test]
    fn zero_rate_is_reported_not_emitted() {
        let derivation = derive_from(
            &[price("2024-01-01", 10.0), price("2024-01-02", 11.0)],
            &[rate("2024-01-01", 0.0), rate("2024-01-02", 2.0)],
        );
        assert_eq!(
            derivation.errors,
            vec![DivisionError { date: d("2024-01-01"), close: 10.0, rate: 0.0 }]
        );
        assert_eq!(derivation.points.len(), 1);
        assert!(derivation.points.iter().all(|p| p.price_usd.is_finite()));
    }

    #[test]
    fn output_is_ascending_for_unordered_input() {
        let derivation = derive_from(
            &[price("2024-01-03", 12.0), price("2024-01-01", 10.0)],
            &[rate("2024-01-01", 1.0), rate("2024-01-03", 1.0)],
        );
        let dates: Vec<_> = derivation.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![d("2024-01-01"), d("2024-01-03")]);
    }

    #[test]
    fn summary_reports_range_and_extremes() {
        let derivation = derive_from(
            &[price("2024-01-01", 10.0), price("2024-01-02", 30.0), price("2024-01-03", 20.0)],
            &[rate("2024-01-01", 1.0), rate("2024-01-02", 1.0), rate("2024-01-03", 1.0)],
        );
        let summary = derivation.summary().unwrap();
        assert_eq!(summary.first_date, d("2024-01-01"));
        assert_eq!(summary.last_date, d("2024-01-03"));
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 30.0);
        assert_eq!(summary.last, 20.0);
        assert!(Derivation::default().summary().is_none());
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("derived.csv");
        write_derived_csv(
            &path,
            &[DerivedPoint { date: d("2024-01-01"), price_usd: 0.5 }],
        )
        .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "date,price_usd\n2024-01-01,0.5\n");
    }
}
