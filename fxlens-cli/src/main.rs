//! fxlens CLI: bootstrap, sync, derive and status commands.
//!
//! Commands:
//! - `init`: create the data directory and one directory per series
//! - `sync`: bring the price and rate series up to today
//! - `derive`: join prices with rates and report the converted series
//! - `status`: report each series' date range and row count

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use fxlens_core::config::AppConfig;
use fxlens_core::data::{
    CircuitBreaker, ExchangeRateApiProvider, ParquetRecord, ParquetStore, PerDayRates,
    PriceSeries, RateSeries, SeriesMeta, YahooProvider,
};
use fxlens_core::domain::{PricePoint, RatePoint};
use fxlens_core::join::{derive, write_derived_csv};
use fxlens_core::sync::{IncrementalSyncer, SyncError, SyncJob, SyncOutcome, SyncReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fxlens",
    about = "fxlens: incremental price and FX rate sync with base-currency conversion"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArg {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and series directories.
    Init {
        #[command(flatten)]
        config: ConfigArg,
    },
    /// Fetch every day missing since each series' last stored date.
    Sync {
        /// Only sync the price series.
        #[arg(long, default_value_t = false, conflicts_with = "rates_only")]
        prices_only: bool,

        /// Only sync the rate series.
        #[arg(long, default_value_t = false)]
        rates_only: bool,

        #[command(flatten)]
        config: ConfigArg,
    },
    /// Convert stored prices into the base currency.
    Derive {
        /// Write the derived series as CSV.
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArg,
    },
    /// Report stored date ranges and row counts.
    Status {
        #[command(flatten)]
        config: ConfigArg,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { config } => run_init(&load_config(&config)?),
        Commands::Sync {
            prices_only,
            rates_only,
            config,
        } => {
            let config = load_config(&config)?;
            let ok = run_sync(&config, !rates_only, !prices_only)?;
            if !ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Derive { output, config } => {
            run_derive(&load_config(&config)?, output.as_deref())
        }
        Commands::Status { config } => run_status(&load_config(&config)?),
    }
}

fn load_config(arg: &ConfigArg) -> Result<AppConfig> {
    let config = match &arg.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    Ok(config.with_env_api_key())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn price_store(config: &AppConfig) -> ParquetStore<PricePoint> {
    ParquetStore::open(&config.data_dir, config.price.symbol.clone())
}

fn rate_store(config: &AppConfig) -> Result<ParquetStore<RatePoint>> {
    Ok(ParquetStore::open(&config.data_dir, config.pair()?.to_string()))
}

fn run_init(config: &AppConfig) -> Result<()> {
    let prices = price_store(config);
    let rates = rate_store(config)?;
    prices.init()?;
    rates.init()?;
    println!("Data directory: {}", config.data_dir.display());
    println!("  {}", prices.series_dir().display());
    println!("  {}", rates.series_dir().display());
    Ok(())
}

/// Returns `false` when any selected series failed.
fn run_sync(config: &AppConfig, prices: bool, rates: bool) -> Result<bool> {
    let pair = config.pair()?;
    let outcome = sync_series(config, prices, rates, today())?;

    let mut ok = true;
    if let Some(result) = outcome.price {
        ok &= report(&config.price.symbol, result);
    }
    if let Some(result) = outcome.rate {
        ok &= report(&pair.to_string(), result);
    }
    Ok(ok)
}

/// Sync the selected series, each behind its own provider and breaker.
///
/// A provider that cannot be built fails only its own series.
fn sync_series(
    config: &AppConfig,
    prices: bool,
    rates: bool,
    today: NaiveDate,
) -> Result<SyncOutcome> {
    let syncer = IncrementalSyncer::new(config.watermark_policy());
    let pair = config.pair()?;
    let prices_store = price_store(config);
    let rates_store = rate_store(config)?;

    let yahoo = prices.then(|| {
        YahooProvider::new(
            &config.price,
            &config.http,
            Arc::new(CircuitBreaker::default_provider()),
        )
    });
    let fx = rates.then(|| {
        ExchangeRateApiProvider::new(
            &config.rate,
            &config.http,
            Arc::new(CircuitBreaker::default_provider()),
        )
        .map(PerDayRates::new)
    });

    let price_source = match &yahoo {
        Some(Ok(provider)) => Some(PriceSeries::new(provider, config.price.symbol.clone())),
        _ => None,
    };
    let rate_source = match &fx {
        Some(Ok(provider)) => Some(RateSeries::new(provider, pair.clone())),
        _ => None,
    };

    let mut outcome = syncer.sync_all(
        price_source
            .as_ref()
            .map(|source| SyncJob::<PricePoint>::new(&prices_store, source)),
        rate_source
            .as_ref()
            .map(|source| SyncJob::<RatePoint>::new(&rates_store, source)),
        today,
    );
    if let Some(Err(e)) = yahoo {
        outcome.price = Some(Err(SyncError::from(e)));
    }
    if let Some(Err(e)) = fx {
        outcome.rate = Some(Err(SyncError::from(e)));
    }
    Ok(outcome)
}

fn report(series: &str, result: Result<SyncReport, SyncError>) -> bool {
    match result {
        Ok(r) => {
            match r.range {
                None => println!("{series}: up to date (last {})", fmt_date(r.watermark_after)),
                Some(range) => println!(
                    "{series}: requested {range}, fetched {}, inserted {}, updated {}, \
                     unchanged {}, last {}",
                    r.fetched,
                    r.upsert.inserted,
                    r.upsert.updated,
                    r.upsert.unchanged,
                    fmt_date(r.watermark_after),
                ),
            }
            if r.discarded_out_of_range > 0 {
                println!("  discarded {} out-of-range record(s)", r.discarded_out_of_range);
            }
            true
        }
        Err(e) => {
            eprintln!("{series}: sync failed: {e}");
            false
        }
    }
}

fn run_derive(config: &AppConfig, output: Option<&Path>) -> Result<()> {
    let derivation = derive(&price_store(config), &rate_store(config)?)?;

    match derivation.summary() {
        None => println!("No overlapping dates between prices and rates."),
        Some(s) => {
            println!();
            println!("=== {} in {} ===", config.price.symbol, config.rate.base);
            println!("Period:  {} to {}", s.first_date, s.last_date);
            println!("Points:  {}", s.count);
            println!("Min:     {:.4}", s.min);
            println!("Max:     {:.4}", s.max);
            println!("Last:    {:.4}", s.last);
        }
    }
    for err in &derivation.errors {
        println!("WARNING: {err}");
    }

    if let Some(path) = output {
        write_derived_csv(path, &derivation.points)?;
        println!("Derived series written to: {}", path.display());
    }
    Ok(())
}

fn run_status(config: &AppConfig) -> Result<()> {
    if !config.data_dir.exists() {
        println!("Data directory does not exist: {}", config.data_dir.display());
        return Ok(());
    }

    println!("Data: {}", config.data_dir.display());
    println!();
    println!("{:<6} {:<12} {:<25} {:>8} {:>10}", "Kind", "Series", "Date Range", "Rows", "Size");
    println!("{}", "-".repeat(65));
    status_row(&price_store(config), &config.price.symbol);
    status_row(&rate_store(config)?, &config.pair()?.to_string());
    Ok(())
}

fn status_row<R: ParquetRecord>(store: &ParquetStore<R>, series: &str) {
    let (range, rows, updated) = match store.meta() {
        Some(SeriesMeta {
            first_date,
            last_date,
            row_count,
            updated_at,
            ..
        }) => (
            format!("{first_date} to {last_date}"),
            row_count.to_string(),
            Some(updated_at),
        ),
        None => ("(empty)".to_string(), "0".to_string(), None),
    };
    println!(
        "{:<6} {:<12} {:<25} {:>8} {:>10}",
        R::KIND.as_str(),
        series,
        range,
        rows,
        format_size(dir_size(store.series_dir()))
    );
    if let Some(updated) = updated {
        println!("{:<6} updated {updated}", "");
    }
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| "none".to_string(), |d| d.to_string())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxlens_core::config::{ConfigError, HttpConfig, PriceConfig, RateConfig};
    use fxlens_core::data::{DatedRecordStore, FetchError};
    use httpmock::prelude::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn mocked_config(server: &MockServer, data_dir: &Path) -> AppConfig {
        AppConfig {
            data_dir: data_dir.to_path_buf(),
            backfill_days: 1,
            price: PriceConfig {
                symbol: "EKGYO.IS".into(),
                base_url: server.base_url(),
            },
            rate: RateConfig {
                api_key: Some("test-key".into()),
                base_url: server.base_url(),
                ..RateConfig::default()
            },
            http: HttpConfig {
                timeout_secs: 5,
                max_retries: 0,
                retry_base_delay_ms: 1,
            },
        }
    }

    #[test]
    fn blocked_price_provider_leaves_rate_sync_running() {
        let server = MockServer::start();
        let chart = server.mock(|when, then| {
            when.method(GET).path("/v8/finance/chart/EKGYO.IS");
            then.status(403);
        });
        let day1 = server.mock(|when, then| {
            when.method(GET).path("/v6/test-key/history/USD/TRY/2024/3/7");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"result":"success","conversion_rate":32.0}"#);
        });
        let day2 = server.mock(|when, then| {
            when.method(GET).path("/v6/test-key/history/USD/TRY/2024/3/8");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"result":"success","conversion_rate":32.1}"#);
        });

        let dir = tempfile::tempdir().unwrap();
        let config = mocked_config(&server, dir.path());
        let outcome = sync_series(&config, true, true, d("2024-03-08")).unwrap();

        chart.assert();
        day1.assert();
        day2.assert();
        assert!(matches!(
            outcome.price,
            Some(Err(SyncError::ProviderUnavailable {
                source: FetchError::CircuitBreakerTripped,
                ..
            }))
        ));
        let rate_report = outcome.rate.unwrap().unwrap();
        assert_eq!(rate_report.upsert.inserted, 2);
        assert_eq!(rate_store(&config).unwrap().load_all().unwrap().len(), 2);
        assert_eq!(price_store(&config).max_key().unwrap(), None);
    }

    #[test]
    fn missing_api_key_fails_only_the_rate_series() {
        let server = MockServer::start();
        let chart = server.mock(|when, then| {
            when.method(GET).path("/v8/finance/chart/EKGYO.IS");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{"chart":{"result":[{
                        "timestamp":[1704178800,1704265200],
                        "indicators":{"quote":[{
                            "open":[40.1,41.0],"high":[41.2,41.9],"low":[39.8,40.6],
                            "close":[41.0,41.5],"volume":[1200000,980000]
                        }]}
                    }],"error":null}}"#,
                );
        });

        let dir = tempfile::tempdir().unwrap();
        let mut config = mocked_config(&server, dir.path());
        config.rate.api_key = None;
        let outcome = sync_series(&config, true, true, d("2024-01-03")).unwrap();

        chart.assert();
        assert!(!outcome.all_succeeded());
        assert!(matches!(
            outcome.rate,
            Some(Err(SyncError::Configuration(ConfigError::MissingApiKey)))
        ));
        assert_eq!(outcome.price.unwrap().unwrap().upsert.inserted, 2);
        assert_eq!(price_store(&config).max_key().unwrap(), Some(d("2024-01-03")));
    }

    #[test]
    fn unselected_series_is_not_synced() {
        let server = MockServer::start();
        let dir = tempfile::tempdir().unwrap();
        let config = mocked_config(&server, dir.path());
        let outcome = sync_series(&config, false, false, d("2024-03-08")).unwrap();
        assert!(outcome.price.is_none());
        assert!(outcome.rate.is_none());
        assert!(outcome.all_succeeded());
    }
}
