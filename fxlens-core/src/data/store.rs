//! Keyed dated-record stores.
//!
//! A store holds one series, keyed by calendar date. Writes are upserts:
//! a record for a date already present replaces the stored row, a record
//! for a new date is inserted, nothing is ever deleted. Every write is one
//! batch that becomes visible as a whole or not at all.

use crate::domain::DatedRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("corrupt series file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("store serialization: {0}")]
    Serialization(String),
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertSummary {
    /// True when the batch changed at least one row.
    pub fn is_write(&self) -> bool {
        self.inserted + self.updated > 0
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

/// A persistent (or in-memory) table of records unique by date.
pub trait DatedRecordStore<R: DatedRecord>: Send + Sync {
    /// Ticker or pair this store holds, used in logs.
    fn series_id(&self) -> &str;

    /// Insert-or-replace every record by date. An empty batch is a no-op.
    fn upsert(&self, records: &[R]) -> Result<UpsertSummary, StoreError>;

    /// Latest stored date, or `None` for an empty store.
    fn max_key(&self) -> Result<Option<NaiveDate>, StoreError>;

    /// Every stored record, ascending by date.
    fn load_all(&self) -> Result<Vec<R>, StoreError>;
}

/// Apply a batch to an ordered table, classifying each record.
///
/// Later records in the batch win over earlier ones for the same date.
pub(crate) fn merge_batch<R: DatedRecord>(
    table: &mut BTreeMap<NaiveDate, R>,
    records: &[R],
) -> UpsertSummary {
    let batch: BTreeMap<NaiveDate, &R> = records.iter().map(|r| (r.date(), r)).collect();

    let mut summary = UpsertSummary::default();
    for (date, record) in batch {
        match table.get(&date) {
            None => {
                table.insert(date, record.clone());
                summary.inserted += 1;
            }
            Some(existing) if existing == record => summary.unchanged += 1,
            Some(_) => {
                table.insert(date, record.clone());
                summary.updated += 1;
            }
        }
    }
    summary
}

/// Store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryStore<R> {
    series_id: String,
    rows: Mutex<BTreeMap<NaiveDate, R>>,
}

impl<R: DatedRecord> MemoryStore<R> {
    pub fn new(series_id: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Store pre-seeded with `records` (upsert semantics).
    pub fn with_records(series_id: impl Into<String>, records: &[R]) -> Self {
        let store = Self::new(series_id);
        merge_batch(&mut store.rows.lock().unwrap_or_else(PoisonError::into_inner), records);
        store
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: DatedRecord> DatedRecordStore<R> for MemoryStore<R> {
    fn series_id(&self) -> &str {
        &self.series_id
    }

    fn upsert(&self, records: &[R]) -> Result<UpsertSummary, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        // Applied to a copy, swapped in whole.
        let mut next = rows.clone();
        let summary = merge_batch(&mut next, records);
        if summary.is_write() {
            *rows = next;
        }
        Ok(summary)
    }

    fn max_key(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner).keys().next_back().copied())
    }

    fn load_all(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect())
    }
}
