//! Application configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields the stock EKGYO / USD-TRY setup. Credentials are
//! carried in the config object and checked where they are needed: a
//! missing rate API key only fails the rate provider's constructor.

use crate::domain::{CurrencyPair, PairError};
use crate::sync::WatermarkPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BACKFILL_DAYS: i64 = 365;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const API_KEY_ENV: &str = "EXCHANGE_RATE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rate provider API key is not configured (set rate.api_key or EXCHANGE_RATE_API_KEY)")]
    MissingApiKey,

    #[error("invalid currency pair: {0}")]
    Pair(#[from] PairError),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Root directory holding one sub-directory per series.
    pub data_dir: PathBuf,
    /// Days fetched when a series is empty.
    pub backfill_days: i64,
    pub price: PriceConfig,
    pub rate: RateConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    /// Provider ticker, including the exchange suffix (`.IS` for Borsa Istanbul).
    pub symbol: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateConfig {
    pub base: String,
    pub quote: String,
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backfill_days: DEFAULT_BACKFILL_DAYS,
            price: PriceConfig::default(),
            rate: RateConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            symbol: "EKGYO.IS".into(),
            base_url: "https://query2.finance.yahoo.com".into(),
        }
    }
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            base: "USD".into(),
            quote: "TRY".into(),
            api_key: None,
            base_url: "https://v6.exchangerate-api.com".into(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl AppConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backfill_days <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backfill_days must be positive, got {}",
                self.backfill_days
            )));
        }
        if self.price.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("price.symbol is empty".into()));
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("http.timeout_secs must be positive".into()));
        }
        self.pair()?;
        Ok(())
    }

    /// Fill `rate.api_key` from the environment if the file left it unset.
    pub fn with_env_api_key(mut self) -> Self {
        if self.rate.api_key.is_none() {
            self.rate.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty());
        }
        self
    }

    pub fn pair(&self) -> Result<CurrencyPair, ConfigError> {
        Ok(CurrencyPair::new(&self.rate.base, &self.rate.quote)?)
    }

    pub fn watermark_policy(&self) -> WatermarkPolicy {
        WatermarkPolicy::new(self.backfill_days)
    }
}

impl RateConfig {
    /// The API key, or [`ConfigError::MissingApiKey`].
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Blocking client with the configured timeout.
    pub fn build_client(&self) -> Result<reqwest::blocking::Client, ConfigError> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout())
            .user_agent(concat!("fxlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.backfill_days, 365);
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert_eq!(config.pair().unwrap().to_string(), "USD/TRY");
    }

    #[test]
    fn partial_toml_overrides() {
        let config = AppConfig::from_toml(
            r#"
data_dir = "/tmp/fx"
backfill_days = 30

[price]
symbol = "THYAO.IS"

[rate]
quote = "EUR"
api_key = "secret"
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/fx"));
        assert_eq!(config.backfill_days, 30);
        assert_eq!(config.price.symbol, "THYAO.IS");
        assert_eq!(config.pair().unwrap().to_string(), "USD/EUR");
        assert_eq!(config.rate.require_api_key().unwrap(), "secret");
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = AppConfig::default();
        assert!(matches!(
            config.rate.require_api_key(),
            Err(ConfigError::MissingApiKey)
        ));

        let blank = RateConfig {
            api_key: Some("   ".into()),
            ..RateConfig::default()
        };
        assert!(matches!(blank.require_api_key(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            AppConfig::from_toml("backfill_days = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[rate]\nquote = \"USD\""),
            Err(ConfigError::Pair(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("unknown = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }
}
