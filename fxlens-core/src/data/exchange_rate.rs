//! exchangerate-api.com per-day FX provider.
//!
//! The history endpoint answers one calendar day per request, so this type
//! implements [`DailyRateProvider`]; wrap it in [`PerDayRates`] to use it as
//! a ranged source.
//!
//! [`PerDayRates`]: super::provider::PerDayRates

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DailyRateProvider, FetchError};
use crate::config::{ConfigError, HttpConfig, RateConfig};
use crate::domain::{CurrencyPair, RatePoint};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    result: String,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    conversion_rate: Option<f64>,
    conversion_rates: Option<HashMap<String, f64>>,
}

pub struct ExchangeRateApiProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ExchangeRateApiProvider {
    /// Fails with [`ConfigError::MissingApiKey`] before any request is made
    /// when no key is configured.
    pub fn new(
        rate: &RateConfig,
        http: &HttpConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ConfigError> {
        let api_key = rate.require_api_key()?.to_string();
        Ok(Self {
            client: http.build_client()?,
            base_url: rate.base_url.trim_end_matches('/').to_string(),
            api_key,
            circuit_breaker,
        })
    }

    fn history_url(&self, pair: &CurrencyPair, date: NaiveDate) -> String {
        format!(
            "{}/v6/{}/history/{}/{}/{}/{}/{}",
            self.base_url,
            self.api_key,
            pair.base(),
            pair.quote(),
            date.year(),
            date.month(),
            date.day()
        )
    }

    fn parse_response(
        pair: &CurrencyPair,
        date: NaiveDate,
        resp: HistoryResponse,
    ) -> Result<Option<RatePoint>, FetchError> {
        if resp.result != "success" {
            let kind = resp.error_type.unwrap_or_else(|| "unknown-error".into());
            let err = match kind.as_str() {
                "no-data-available" => return Ok(None),
                "invalid-key" | "inactive-account" => FetchError::AuthenticationRequired(kind),
                "quota-reached" => FetchError::RateLimited {
                    retry_after_secs: 3600,
                },
                _ => FetchError::ResponseFormatChanged(kind),
            };
            return Err(err);
        }

        let rate = resp.conversion_rate.or_else(|| {
            resp.conversion_rates
                .as_ref()
                .and_then(|rates| rates.get(pair.quote()).copied())
        });

        Ok(rate
            .filter(|r| r.is_finite())
            .map(|rate| RatePoint { date, rate }))
    }
}

impl DailyRateProvider for ExchangeRateApiProvider {
    fn name(&self) -> &str {
        "exchangerate_api"
    }

    fn fetch_rate_on(
        &self,
        pair: &CurrencyPair,
        date: NaiveDate,
    ) -> Result<Option<RatePoint>, FetchError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(FetchError::CircuitBreakerTripped);
        }

        let resp = self
            .client
            .get(self.history_url(pair, date))
            .send()
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                FetchError::from_transport(e)
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(FetchError::CircuitBreakerTripped);
        }
        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                self.circuit_breaker.record_failure();
            }
            return Err(FetchError::Http {
                status: status.as_u16(),
                context: format!("{pair} history for {date}"),
            });
        }

        let body: HistoryResponse = resp
            .json()
            .map_err(|e| FetchError::ResponseFormatChanged(format!("{pair} on {date}: {e}")))?;
        let point = Self::parse_response(pair, date, body)?;
        self.circuit_breaker.record_success();
        Ok(point)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
