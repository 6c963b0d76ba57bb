//! Watermark resolution: which days still need fetching.

use crate::config::DEFAULT_BACKFILL_DAYS;
use crate::domain::DateRange;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// How far back an empty series is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkPolicy {
    backfill_days: i64,
}

impl WatermarkPolicy {
    /// Non-positive windows are clamped to one day.
    pub fn new(backfill_days: i64) -> Self {
        Self {
            backfill_days: backfill_days.max(1),
        }
    }

    pub fn backfill_days(&self) -> i64 {
        self.backfill_days
    }

    /// Next range to fetch given the latest stored date.
    ///
    /// - empty store: `[today - backfill_days, today]`
    /// - otherwise: `[watermark + 1, today]`, or `None` when already current
    ///
    /// The watermark day itself is never re-fetched: a stored day is final.
    pub fn resolve(&self, watermark: Option<NaiveDate>, today: NaiveDate) -> Option<DateRange> {
        let start = match watermark {
            None => today
                .checked_sub_signed(Duration::days(self.backfill_days))
                .unwrap_or(NaiveDate::MIN),
            Some(last) => last.succ_opt()?,
        };
        DateRange::new(start, today)
    }
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKFILL_DAYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn empty_store_gets_backfill_window() {
        let range = WatermarkPolicy::default()
            .resolve(None, d("2024-06-30"))
            .unwrap();
        assert_eq!(range.start(), d("2023-07-01"));
        assert_eq!(range.end(), d("2024-06-30"));
    }

    #[test]
    fn custom_backfill_window() {
        let range = WatermarkPolicy::new(5).resolve(None, d("2024-01-10")).unwrap();
        assert_eq!(range.start(), d("2024-01-05"));
        assert_eq!(range.len_days(), 6);
    }

    #[test]
    fn resumes_the_day_after_watermark() {
        let range = WatermarkPolicy::default()
            .resolve(Some(d("2024-03-14")), d("2024-03-20"))
            .unwrap();
        assert_eq!(range.start(), d("2024-03-15"));
        assert_eq!(range.end(), d("2024-03-20"));
    }

    #[test]
    fn current_store_resolves_to_nothing() {
        let policy = WatermarkPolicy::default();
        assert_eq!(policy.resolve(Some(d("2024-03-20")), d("2024-03-20")), None);
        // A watermark in the future (clock skew) is also "nothing to do".
        assert_eq!(policy.resolve(Some(d("2024-03-25")), d("2024-03-20")), None);
    }

    #[test]
    fn watermark_yesterday_fetches_only_today() {
        let range = WatermarkPolicy::default()
            .resolve(Some(d("2024-03-19")), d("2024-03-20"))
            .unwrap();
        assert_eq!(range.len_days(), 1);
    }

    #[test]
    fn zero_window_is_clamped() {
        assert_eq!(WatermarkPolicy::new(0).backfill_days(), 1);
    }
}
