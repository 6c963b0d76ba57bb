//! Provider traits, the uniform range-fetch capability, and structured fetch errors.
//!
//! Upstream sources come in two shapes: ranged (one request returns every
//! available day in `[start, end]`) and per-day (one request per date).
//! Both are bound to a concrete series and exposed as a [`RangeSource`] so
//! the syncer never knows which shape it is talking to.

use crate::domain::{CurrencyPair, DateRange, PricePoint, RatePoint};
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for provider calls.
///
/// An `Ok(vec![])` from a provider means "no data for that range", which is
/// distinct from every variant here.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("HTTP {status}: {context}")]
    Http { status: u16, context: String },
}

impl FetchError {
    /// Map a transport error from reqwest into the provider taxonomy.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::NetworkUnreachable(e.to_string())
        }
    }

    /// Worth retrying with backoff inside a single request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::NetworkUnreachable(_)
                | FetchError::Timeout(_)
                | FetchError::RateLimited { .. }
        ) || matches!(self, FetchError::Http { status, .. } if *status >= 500)
    }
}

/// Ranged daily OHLCV provider (Yahoo Finance, CSV import, ...).
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily bars for `symbol` over `[start, end]`.
    ///
    /// May return fewer days than requested (holidays, provider gaps).
    fn fetch_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Ranged FX provider.
pub trait RateProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_rates(
        &self,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, FetchError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// FX provider that answers one date per request.
pub trait DailyRateProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the provider has no rate for that day.
    fn fetch_rate_on(
        &self,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<RatePoint>, FetchError>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Adapts a per-day provider into a ranged [`RateProvider`].
///
/// A failure on one day is a gap, not an abort: the other days are still
/// returned. Only when no day was answered at all (with a rate or with "no
/// data") is the whole range reported as failed, carrying the last error.
pub struct PerDayRates<P> {
    inner: P,
}

impl<P: DailyRateProvider> PerDayRates<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: DailyRateProvider> RateProvider for PerDayRates<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch_rates(
        &self,
        pair: &CurrencyPair,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RatePoint>, FetchError> {
        let Some(range) = DateRange::new(start, end) else {
            return Ok(Vec::new());
        };

        let mut rates = Vec::new();
        let mut last_error = None;
        let mut answered = false;
        let mut gaps = 0usize;

        for date in range.days() {
            match self.inner.fetch_rate_on(pair, date) {
                Ok(Some(point)) => {
                    answered = true;
                    rates.push(point);
                }
                Ok(None) => {
                    answered = true;
                    gaps += 1;
                }
                Err(FetchError::CircuitBreakerTripped) => {
                    tracing::warn!(
                        provider = self.inner.name(),
                        %pair,
                        %date,
                        "circuit breaker tripped, stopping per-day fetch"
                    );
                    last_error = Some(FetchError::CircuitBreakerTripped);
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        provider = self.inner.name(),
                        %pair,
                        %date,
                        error = %e,
                        "per-day rate fetch failed"
                    );
                    gaps += 1;
                    last_error = Some(e);
                }
            }
        }

        if !answered {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        if gaps > 0 {
            tracing::debug!(
                provider = self.inner.name(),
                %pair,
                %range,
                fetched = rates.len(),
                gaps,
                "per-day fetch finished with gaps"
            );
        }

        Ok(rates)
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

/// The uniform capability the syncer consumes: fetch one bound series over a range.
pub trait RangeSource<R> {
    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<R>, FetchError>;
}

impl<R, F> RangeSource<R> for F
where
    F: Fn(NaiveDate, NaiveDate) -> Result<Vec<R>, FetchError>,
{
    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<R>, FetchError> {
        self(start, end)
    }
}

/// A price provider bound to one symbol.
pub struct PriceSeries<'a> {
    provider: &'a dyn PriceProvider,
    symbol: String,
}

impl<'a> PriceSeries<'a> {
    pub fn new(provider: &'a dyn PriceProvider, symbol: impl Into<String>) -> Self {
        Self {
            provider,
            symbol: symbol.into(),
        }
    }
}

impl RangeSource<PricePoint> for PriceSeries<'_> {
    fn fetch_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError> {
        if !self.provider.is_available() {
            return Err(FetchError::CircuitBreakerTripped);
        }
        self.provider.fetch_prices(&self.symbol, start, end)
    }
}

/// A rate provider bound to one currency pair.
pub struct RateSeries<'a> {
    provider: &'a dyn RateProvider,
    pair: CurrencyPair,
}

impl<'a> RateSeries<'a> {
    pub fn new(provider: &'a dyn RateProvider, pair: CurrencyPair) -> Self {
        Self { provider, pair }
    }
}

impl RangeSource<RatePoint> for RateSeries<'_> {
    fn fetch_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RatePoint>, FetchError> {
        if !self.provider.is_available() {
            return Err(FetchError::CircuitBreakerTripped);
        }
        self.provider.fetch_rates(&self.pair, start, end)
    }
}
