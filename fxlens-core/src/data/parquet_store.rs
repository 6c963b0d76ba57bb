//! Parquet-backed series store.
//!
//! Layout: `{data_dir}/{kind}={SERIES}/series.parquet` plus a `meta.json`
//! sidecar, e.g. `data/price=EKGYO.IS/series.parquet` and
//! `data/rate=USD-TRY/series.parquet`.
//!
//! - Upserts rewrite the whole file: write to `.tmp`, fsync, rename into place
//! - The parquet file is the source of truth for `max_key`; the sidecar is
//!   informational (status reporting) and rewritten after each write
//! - An unreadable file is reported, never treated as empty

use super::store::{merge_batch, DatedRecordStore, StoreError, UpsertSummary};
use crate::domain::{DatedRecord, PricePoint, RatePoint, SeriesKind};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const DATA_FILE: &str = "series.parquet";
const META_FILE: &str = "meta.json";

/// Metadata sidecar for a stored series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMeta {
    pub series_id: String,
    pub kind: SeriesKind,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub row_count: usize,
    pub data_hash: String,
    pub updated_at: chrono::NaiveDateTime,
}

/// Conversion between a record type and its parquet columns.
pub trait ParquetRecord: DatedRecord + Serialize {
    const COLUMNS: &'static [&'static str];

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame>;

    fn from_frame(df: &DataFrame) -> PolarsResult<Vec<Self>>;
}

pub struct ParquetStore<R> {
    series_dir: PathBuf,
    series_id: String,
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> R>,
}

impl<R: ParquetRecord> ParquetStore<R> {
    /// Handle for `series_id` under `data_dir`. Performs no I/O.
    pub fn open(data_dir: impl AsRef<Path>, series_id: impl Into<String>) -> Self {
        let series_id = series_id.into();
        let series_dir = data_dir
            .as_ref()
            .join(format!("{}={}", R::KIND, dir_safe(&series_id)));
        Self {
            series_dir,
            series_id,
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    /// Create the series directory. Idempotent.
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.series_dir).map_err(|source| StoreError::Io {
            path: self.series_dir.clone(),
            source,
        })
    }

    pub fn series_dir(&self) -> &Path {
        &self.series_dir
    }

    fn data_path(&self) -> PathBuf {
        self.series_dir.join(DATA_FILE)
    }

    fn meta_path(&self) -> PathBuf {
        self.series_dir.join(META_FILE)
    }

    /// Sidecar metadata, if the series has been written at least once.
    pub fn meta(&self) -> Option<SeriesMeta> {
        let content = fs::read_to_string(self.meta_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn read_table(&self) -> Result<BTreeMap<NaiveDate, R>, StoreError> {
        let path = self.data_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let file = fs::File::open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let df = ParquetReader::new(file).finish().map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        for col_name in R::COLUMNS {
            if df.column(col_name).is_err() {
                return Err(StoreError::Corrupt {
                    path,
                    reason: format!("missing column '{col_name}'"),
                });
            }
        }

        let records = R::from_frame(&df).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let mut table = BTreeMap::new();
        merge_batch(&mut table, &records);
        Ok(table)
    }

    /// Replace the series file with `records` (already sorted and unique).
    fn write_table(&self, records: &[R]) -> Result<(), StoreError> {
        self.init()?;

        let mut df = R::to_frame(records)
            .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))?;
        let path = self.data_path();
        let tmp_path = path.with_extension("parquet.tmp");

        let io_err = |source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        };
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        ParquetWriter::new(&mut file)
            .finish(&mut df)
            .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|source| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io {
                path: path.clone(),
                source,
            }
        })?;

        if let Err(e) = self.write_meta(records) {
            tracing::warn!(series = %self.series_id, error = %e, "failed to write series metadata");
        }
        Ok(())
    }

    fn write_meta(&self, records: &[R]) -> Result<(), StoreError> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(records)
            .map_err(|e| StoreError::Serialization(format!("hash serialization: {e}")))?;
        let meta = SeriesMeta {
            series_id: self.series_id.clone(),
            kind: R::KIND,
            first_date: first.date(),
            last_date: last.date(),
            row_count: records.len(),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            updated_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Serialization(format!("meta serialization: {e}")))?;
        let path = self.meta_path();
        fs::write(&path, json).map_err(|source| StoreError::Io { path, source })
    }
}

impl<R: ParquetRecord> DatedRecordStore<R> for ParquetStore<R> {
    fn series_id(&self) -> &str {
        &self.series_id
    }

    fn upsert(&self, records: &[R]) -> Result<UpsertSummary, StoreError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.read_table()?;
        let summary = merge_batch(&mut table, records);
        if summary.is_write() {
            let rows: Vec<R> = table.into_values().collect();
            self.write_table(&rows)?;
            tracing::debug!(
                series = %self.series_id,
                kind = %R::KIND,
                inserted = summary.inserted,
                updated = summary.updated,
                rows = rows.len(),
                "series file rewritten"
            );
        }
        Ok(summary)
    }

    fn max_key(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.read_table()?.keys().next_back().copied())
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.read_table()?.into_values().collect())
    }
}

/// Series ids become directory names; `/` in a pair id is not allowed there.
fn dir_safe(series_id: &str) -> String {
    series_id.replace(['/', '\\'], "-")
}

// ── Column conversion ───────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn date_column(dates: impl Iterator<Item = NaiveDate>) -> PolarsResult<Column> {
    let days: Vec<i32> = dates.map(|d| (d - epoch()).num_days() as i32).collect();
    Column::new("date".into(), days).cast(&DataType::Date)
}

fn read_dates(df: &DataFrame) -> PolarsResult<Vec<NaiveDate>> {
    let date_ca = df.column("date")?.date()?;
    (0..df.height())
        .map(|i| {
            date_ca
                .get(i)
                .map(|days| epoch() + chrono::Duration::days(days as i64))
                .ok_or_else(|| PolarsError::ComputeError(format!("null date at row {i}").into()))
        })
        .collect()
}

fn read_f64(df: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    let ca = df.column(name)?.f64()?;
    (0..df.height())
        .map(|i| {
            ca.get(i)
                .ok_or_else(|| PolarsError::ComputeError(format!("null {name} at row {i}").into()))
        })
        .collect()
}

fn read_u64(df: &DataFrame, name: &str) -> PolarsResult<Vec<u64>> {
    let ca = df.column(name)?.u64()?;
    (0..df.height())
        .map(|i| {
            ca.get(i)
                .ok_or_else(|| PolarsError::ComputeError(format!("null {name} at row {i}").into()))
        })
        .collect()
}

impl ParquetRecord for PricePoint {
    const COLUMNS: &'static [&'static str] = &["date", "open", "high", "low", "close", "volume"];

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            date_column(records.iter().map(|p| p.date))?,
            Column::new("open".into(), records.iter().map(|p| p.open).collect::<Vec<_>>()),
            Column::new("high".into(), records.iter().map(|p| p.high).collect::<Vec<_>>()),
            Column::new("low".into(), records.iter().map(|p| p.low).collect::<Vec<_>>()),
            Column::new("close".into(), records.iter().map(|p| p.close).collect::<Vec<_>>()),
            Column::new("volume".into(), records.iter().map(|p| p.volume).collect::<Vec<_>>()),
        ])
    }

    fn from_frame(df: &DataFrame) -> PolarsResult<Vec<Self>> {
        let dates = read_dates(df)?;
        let opens = read_f64(df, "open")?;
        let highs = read_f64(df, "high")?;
        let lows = read_f64(df, "low")?;
        let closes = read_f64(df, "close")?;
        let volumes = read_u64(df, "volume")?;

        Ok((0..df.height())
            .map(|i| PricePoint {
                date: dates[i],
                open: opens[i],
                high: highs[i],
                low: lows[i],
                close: closes[i],
                volume: volumes[i],
            })
            .collect())
    }
}

impl ParquetRecord for RatePoint {
    const COLUMNS: &'static [&'static str] = &["date", "rate"];

    fn to_frame(records: &[Self]) -> PolarsResult<DataFrame> {
        DataFrame::new(vec![
            date_column(records.iter().map(|r| r.date))?,
            Column::new("rate".into(), records.iter().map(|r| r.rate).collect::<Vec<_>>()),
        ])
    }

    fn from_frame(df: &DataFrame) -> PolarsResult<Vec<Self>> {
        let dates = read_dates(df)?;
        let rates = read_f64(df, "rate")?;
        Ok(dates
            .into_iter()
            .zip(rates)
            .map(|(date, rate)| RatePoint { date, rate })
            .collect())
    }
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
            open: close - 0.2,
            high: close + 0.3,
            low: close - 0.4,
            close,
            volume: 25_000_000,
        }
    }

    #[test]
    fn write_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<PricePoint> = ParquetStore::open(dir.path(), "EKGYO.IS");

        store
            .upsert(&[price("2024-01-03", 12.8), price("2024-01-02", 12.2)])
            .unwrap();
        let loaded = store.load_all().unwrap();

        assert_eq!(loaded, vec![price("2024-01-02", 12.2), price("2024-01-03", 12.8)]);
        assert_eq!(store.max_key().unwrap(), Some(d("2024-01-03")));
        assert!(dir.path().join("price=EKGYO.IS").join("series.parquet").exists());
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "USD/TRY");
        assert_eq!(store.max_key().unwrap(), None);
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.meta().is_none());
    }

    #[test]
    fn pair_id_is_directory_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "USD/TRY");
        store.init().unwrap();
        assert!(dir.path().join("rate=USD-TRY").is_dir());
    }

    #[test]
    fn meta_tracks_range_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "USD/TRY");
        store
            .upsert(&[
                RatePoint { date: d("2024-01-01"), rate: 29.5 },
                RatePoint { date: d("2024-01-04"), rate: 29.8 },
            ])
            .unwrap();

        let meta = store.meta().unwrap();
        assert_eq!(meta.series_id, "USD/TRY");
        assert_eq!(meta.kind, SeriesKind::Rate);
        assert_eq!(meta.first_date, d("2024-01-01"));
        assert_eq!(meta.last_date, d("2024-01-04"));
        assert_eq!(meta.row_count, 2);
        assert_eq!(meta.data_hash.len(), 64);
    }

    #[test]
    fn unchanged_batch_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "USD/TRY");
        let batch = [RatePoint { date: d("2024-01-01"), rate: 29.5 }];
        store.upsert(&batch).unwrap();
        let hash_before = store.meta().unwrap().data_hash;
        let updated_before = store.meta().unwrap().updated_at;

        let summary = store.upsert(&batch).unwrap();
        assert_eq!(summary.unchanged, 1);
        assert!(!summary.is_write());
        let meta = store.meta().unwrap();
        assert_eq!(meta.data_hash, hash_before);
        assert_eq!(meta.updated_at, updated_before);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "USD/TRY");
        store.init().unwrap();
        fs::write(store.series_dir().join(DATA_FILE), b"not parquet").unwrap();

        assert!(matches!(store.max_key(), Err(StoreError::Corrupt { .. })));
        assert!(matches!(
            store.upsert(&[RatePoint { date: d("2024-01-01"), rate: 29.5 }]),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn wrong_schema_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rates: ParquetStore<RatePoint> = ParquetStore::open(dir.path(), "X");
        rates
            .upsert(&[RatePoint { date: d("2024-01-01"), rate: 1.0 }])
            .unwrap();

        // Point a price store at the rate file.
        let prices: ParquetStore<PricePoint> = ParquetStore::open(dir.path(), "X");
        prices.init().unwrap();
        fs::copy(
            rates.series_dir().join(DATA_FILE),
            prices.series_dir().join(DATA_FILE),
        )
        .unwrap();
        assert!(matches!(prices.load_all(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn null_volume_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store: ParquetStore<PricePoint> = ParquetStore::open(dir.path(), "EKGYO.IS");
        store.init().unwrap();

        let mut df = PricePoint::to_frame(&[price("2024-01-02", 12.2)]).unwrap();
        df.with_column(Column::new("volume".into(), vec![None::<u64>]))
            .unwrap();
        let mut file = fs::File::create(store.series_dir().join(DATA_FILE)).unwrap();
        ParquetWriter::new(&mut file).finish(&mut df).unwrap();
        drop(file);

        let err = store.load_all().unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref reason, .. } if reason.contains("volume")));
    }
}
