//! Incremental sync: resolve the missing range, fetch it, upsert it.

use super::watermark::WatermarkPolicy;
use crate::config::ConfigError;
use crate::data::provider::{FetchError, RangeSource};
use crate::data::store::{DatedRecordStore, StoreError, UpsertSummary};
use crate::domain::{DateRange, DatedRecord, PricePoint, RatePoint, SeriesKind};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("provider unavailable for {series}: {source}")]
    ProviderUnavailable {
        series: String,
        #[source]
        source: FetchError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// What one sync run did to one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub series: String,
    pub kind: SeriesKind,
    /// Range requested from the provider; `None` when already current.
    pub range: Option<DateRange>,
    pub fetched: usize,
    pub discarded_out_of_range: usize,
    pub duplicates_in_batch: usize,
    pub upsert: UpsertSummary,
    pub watermark_before: Option<NaiveDate>,
    pub watermark_after: Option<NaiveDate>,
}

impl SyncReport {
    fn up_to_date(series: &str, kind: SeriesKind, watermark: Option<NaiveDate>) -> Self {
        Self {
            series: series.to_string(),
            kind,
            range: None,
            fetched: 0,
            discarded_out_of_range: 0,
            duplicates_in_batch: 0,
            upsert: UpsertSummary::default(),
            watermark_before: watermark,
            watermark_after: watermark,
        }
    }

    /// True when nothing was written.
    pub fn is_noop(&self) -> bool {
        !self.upsert.is_write()
    }
}

/// One series to sync: its store and where its data comes from.
pub struct SyncJob<'a, R: DatedRecord> {
    pub store: &'a dyn DatedRecordStore<R>,
    pub source: &'a dyn RangeSource<R>,
}

impl<'a, R: DatedRecord> SyncJob<'a, R> {
    pub fn new(store: &'a dyn DatedRecordStore<R>, source: &'a dyn RangeSource<R>) -> Self {
        Self { store, source }
    }
}

/// Results of syncing the price and rate series together.
#[derive(Debug)]
pub struct SyncOutcome {
    pub price: Option<Result<SyncReport, SyncError>>,
    pub rate: Option<Result<SyncReport, SyncError>>,
}

impl SyncOutcome {
    pub fn all_succeeded(&self) -> bool {
        [&self.price, &self.rate]
            .into_iter()
            .flatten()
            .all(|r| r.is_ok())
    }
}

/// Brings a store up to `today` without re-fetching stored days.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementalSyncer {
    policy: WatermarkPolicy,
}

impl IncrementalSyncer {
    pub fn new(policy: WatermarkPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> WatermarkPolicy {
        self.policy
    }

    /// Sync one series.
    ///
    /// A failed fetch aborts with [`SyncError::ProviderUnavailable`] before
    /// the store is touched. Records outside the requested range are
    /// dropped; duplicate dates within the response collapse to the last one.
    pub fn sync<R, S, F>(
        &self,
        store: &S,
        source: &F,
        today: NaiveDate,
    ) -> Result<SyncReport, SyncError>
    where
        R: DatedRecord,
        S: DatedRecordStore<R> + ?Sized,
        F: RangeSource<R> + ?Sized,
    {
        let series = store.series_id();
        let watermark = store.max_key()?;

        let Some(range) = self.policy.resolve(watermark, today) else {
            tracing::debug!(series, kind = %R::KIND, ?watermark, "already up to date");
            return Ok(SyncReport::up_to_date(series, R::KIND, watermark));
        };

        tracing::info!(series, kind = %R::KIND, %range, "sync starting");

        let fetched = source
            .fetch_range(range.start(), range.end())
            .map_err(|err| {
                tracing::warn!(series, kind = %R::KIND, %range, error = %err, "fetch failed");
                SyncError::ProviderUnavailable {
                    series: series.to_string(),
                    source: err,
                }
            })?;
        let fetched_count = fetched.len();

        let mut batch: BTreeMap<NaiveDate, R> = BTreeMap::new();
        let mut discarded = 0;
        let mut in_range = 0;
        for record in fetched {
            if !range.contains(record.date()) {
                discarded += 1;
                continue;
            }
            in_range += 1;
            batch.insert(record.date(), record);
        }
        if discarded > 0 {
            tracing::warn!(
                series,
                %range,
                discarded,
                "provider returned records outside the requested range"
            );
        }
        let duplicates = in_range - batch.len();

        let records: Vec<R> = batch.into_values().collect();
        let upsert = store.upsert(&records)?;
        let watermark_after = store.max_key()?;

        tracing::info!(
            series,
            kind = %R::KIND,
            fetched = fetched_count,
            inserted = upsert.inserted,
            updated = upsert.updated,
            unchanged = upsert.unchanged,
            ?watermark_after,
            "sync finished"
        );

        Ok(SyncReport {
            series: series.to_string(),
            kind: R::KIND,
            range: Some(range),
            fetched: fetched_count,
            discarded_out_of_range: discarded,
            duplicates_in_batch: duplicates,
            upsert,
            watermark_before: watermark,
            watermark_after,
        })
    }

    /// Sync prices then rates. A failure of one never prevents the other.
    pub fn sync_all(
        &self,
        price: Option<SyncJob<'_, PricePoint>>,
        rate: Option<SyncJob<'_, RatePoint>>,
        today: NaiveDate,
    ) -> SyncOutcome {
        SyncOutcome {
            price: price.map(|job| self.sync(job.store, job.source, today)),
            rate: rate.map(|job| self.sync(job.store, job.source, today)),
        }
    }
}
