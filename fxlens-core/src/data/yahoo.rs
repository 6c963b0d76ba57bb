//! Yahoo Finance price provider.
//!
//! Fetches daily OHLCV bars from Yahoo's v8 chart API with retry, exponential
//! backoff and a circuit breaker. Yahoo has no official API and is
//! subject to unannounced format changes; parse failures surface as
//! [`FetchError::ResponseFormatChanged`].

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchError, PriceProvider};
use crate::config::{ConfigError, HttpConfig, PriceConfig};
use crate::domain::PricePoint;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

/// Exchange metadata; `gmtoffset` is the exchange's UTC offset in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(
        price: &PriceConfig,
        http: &HttpConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http.build_client()?,
            base_url: price.base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
            max_retries: http.max_retries,
            base_delay: http.retry_base_delay(),
        })
    }

    /// Chart API URL. `period2` is the end of the last requested day so the
    /// end date is inclusive.
    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
        let start_ts = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end_ts = end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;
        format!(
            "{}/v8/finance/chart/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url
        )
    }

    /// Parse the chart API response into price points.
    ///
    /// A result with no timestamps is an empty range (holidays, weekend-only
    /// windows), not an error. Days without a close are skipped. Bar dates
    /// are taken in exchange-local time.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<PricePoint>, FetchError> {
        let result = match resp.chart.result {
            Some(result) => result,
            None => {
                return Err(match resp.chart.error {
                    Some(err) if err.code == "Not Found" => FetchError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    },
                    Some(err) => FetchError::ResponseFormatChanged(format!(
                        "{}: {}",
                        err.code, err.description
                    )),
                    None => FetchError::ResponseFormatChanged("empty result with no error".into()),
                })
            }
        };

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("result array is empty".into()))?;

        let Some(timestamps) = data.timestamp else {
            return Ok(Vec::new());
        };

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::ResponseFormatChanged("no quote data".into()))?;

        let gmtoffset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

        let mut points = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = ts
                .checked_add(gmtoffset)
                .and_then(|local| chrono::DateTime::from_timestamp(local, 0))
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    FetchError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
                })?;

            let Some(close) = quote.close.get(i).copied().flatten() else {
                tracing::debug!(symbol, %date, "skipping bar without close");
                continue;
            };
            let field = |v: &[Option<f64>]| v.get(i).copied().flatten().unwrap_or(close);

            let point = PricePoint {
                date,
                open: field(quote.open.as_slice()),
                high: field(quote.high.as_slice()),
                low: field(quote.low.as_slice()),
                close,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
            };
            if point.is_finite() {
                points.push(point);
            }
        }

        Ok(points)
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError> {
        let url = self.chart_url(symbol, start, end);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(
                    symbol,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying chart request"
                );
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(FetchError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(&url).send() {
                Ok(resp) => resp,
                Err(e) => {
                    let err = FetchError::from_transport(e);
                    self.circuit_breaker.record_failure();
                    if err.is_transient() {
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = resp.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                self.circuit_breaker.trip();
                return Err(FetchError::CircuitBreakerTripped);
            }
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(FetchError::AuthenticationRequired(
                    "Yahoo Finance requires authentication".into(),
                ));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(FetchError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after_secs = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(FetchError::RateLimited { retry_after_secs });
                continue;
            }
            if !status.is_success() {
                self.circuit_breaker.record_failure();
                let err = FetchError::Http {
                    status: status.as_u16(),
                    context: format!("chart request for {symbol}"),
                };
                if err.is_transient() {
                    last_error = Some(err);
                    continue;
                }
                return Err(err);
            }

            let chart: ChartResponse = resp.json().map_err(|e| {
                FetchError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {e}"
                ))
            })?;
            let points = Self::parse_response(symbol, chart)?;
            self.circuit_breaker.record_success();
            return Ok(points);
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::NetworkUnreachable("max retries exceeded".into())))
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_prices(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>, FetchError> {
        self.fetch_with_retry(symbol, start, end)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
